//! Transport selection for Postgres connections, driven by the url's `sslmode`.

use super::DbError;
use crate::config::DatabaseConfig;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ClientConfig, RootCertStore,
};
use std::{fmt::Display, fs, io::Cursor, sync::Arc};
use tokio_postgres::config::SslMode;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

pub(super) enum Transport {
    Plain,
    Tls(MakeRustlsConnect),
}

/// `sslmode=disable` connects in plain text. Every other mode negotiates TLS verified against the
/// platform roots plus `PGSSLROOTCERT`. Under `prefer` with no trusted roots at all, plain text.
pub(super) fn transport(mode: SslMode, config: &DatabaseConfig) -> Result<Transport, DbError> {
    if mode == SslMode::Disable {
        return Ok(Transport::Plain);
    }

    let roots = trusted_roots(config.pg_ssl_root_cert.as_deref())?;
    if roots.is_empty() {
        if mode == SslMode::Prefer {
            debug!("no trusted root certificates; connecting without TLS");
            return Ok(Transport::Plain);
        }
        return Err(DbError::Tls(
            "no trusted root certificates available for sslmode=require".into(),
        ));
    }

    let client_config = client_config(roots, config)?;
    Ok(Transport::Tls(MakeRustlsConnect::new(client_config)))
}

fn trusted_roots(root_cert: Option<&str>) -> Result<RootCertStore, DbError> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!(error = %err, "skipping unreadable platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded platform root certificates");

    if let Some(path) = root_cert {
        for cert in read_certs("PGSSLROOTCERT", path)? {
            roots
                .add(cert)
                .map_err(|err| tls_error("PGSSLROOTCERT", path, err))?;
        }
    }

    Ok(roots)
}

fn client_config(roots: RootCertStore, config: &DatabaseConfig) -> Result<ClientConfig, DbError> {
    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|err| DbError::Tls(err.to_string()))?
            .with_root_certificates(roots);

    match (config.pg_ssl_cert.as_deref(), config.pg_ssl_key.as_deref()) {
        (None, None) => Ok(builder.with_no_client_auth()),
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs("PGSSLCERT", cert)?, read_key(key)?)
            .map_err(|err| tls_error("PGSSLCERT", cert, err)),
        _ => Err(DbError::Tls(
            "PGSSLCERT and PGSSLKEY must be set together".into(),
        )),
    }
}

fn read_certs(var: &str, path: &str) -> Result<Vec<CertificateDer<'static>>, DbError> {
    let pem = fs::read(path).map_err(|err| tls_error(var, path, err))?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| tls_error(var, path, err))?;
    if certs.is_empty() {
        return Err(tls_error(var, path, "no certificates found"));
    }
    Ok(certs)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>, DbError> {
    let pem = fs::read(path).map_err(|err| tls_error("PGSSLKEY", path, err))?;
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|err| tls_error("PGSSLKEY", path, err))?
        .ok_or_else(|| tls_error("PGSSLKEY", path, "no private key found"))
}

fn tls_error(var: &str, path: &str, err: impl Display) -> DbError {
    DbError::Tls(format!("{var} '{path}': {err}"))
}
