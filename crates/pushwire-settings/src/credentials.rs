//! Reading the TLS client identity from disk.

use std::path::Path;

use pushwire_core::Credentials;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CredentialPaths;

/// Read the certificate chain and private key named by `paths`.
///
/// Contents are not parsed here; the TLS connector does that.
pub fn load_credentials(paths: &CredentialPaths) -> Result<Credentials> {
    let certificate_pem = read_pem(&paths.certificate)?;
    let private_key_pem = read_pem(&paths.private_key)?;
    debug!(
        certificate = %paths.certificate.display(),
        private_key = %paths.private_key.display(),
        encrypted = paths.passphrase.is_some(),
        "loaded credentials"
    );

    let credentials = Credentials::new(certificate_pem, private_key_pem);
    Ok(match &paths.passphrase {
        Some(pass) => credentials.with_passphrase(pass.expose_secret()),
        None => credentials,
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| SettingsError::Credentials {
        path: path.to_path_buf(),
        source,
    })
}
