//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::handler::TlsSocketWrapper;
use crate::support::async_io::BoxedSessionStream;
use crate::support::error::Error;

/// `TlsSocketWrapper` backed by rustls.
///
/// This is the wrapper most embedders want for STARTTLS; anything more
/// exotic (client certificates, SNI-dependent keys, another TLS stack) can
/// implement `TlsSocketWrapper` directly.
pub struct RustlsTlsWrapper {
    acceptor: TlsAcceptor,
}

impl RustlsTlsWrapper {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        RustlsTlsWrapper {
            acceptor: TlsAcceptor::from(config),
        }
    }

    /// Builds a wrapper from a PEM certificate chain and a PKCS#8 private
    /// key.
    pub fn from_pem_files(
        certificate_chain: &Path,
        private_key: &Path,
    ) -> Result<Self, Error> {
        let certs =
            rustls_pemfile::certs(&mut BufReader::new(File::open(
                certificate_chain,
            )?))?
            .into_iter()
            .map(Certificate)
            .collect::<Vec<_>>();

        let mut keys = rustls_pemfile::pkcs8_private_keys(
            &mut BufReader::new(File::open(private_key)?),
        )?;
        let Some(key) = keys.pop() else {
            return Err(Error::Config(
                "no PKCS#8 private key found in the key file",
            ));
        };

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, PrivateKey(key))
            .map_err(|e| {
                Error::Io(io::Error::new(io::ErrorKind::InvalidInput, e))
            })?;

        Ok(Self::new(Arc::new(config)))
    }
}

impl TlsSocketWrapper for RustlsTlsWrapper {
    fn wrap(
        &self,
        plain: BoxedSessionStream,
    ) -> Pin<
        Box<dyn Future<Output = io::Result<BoxedSessionStream>> + Send + '_>,
    > {
        let acceptor = self.acceptor.clone();
        Box::pin(async move {
            let tls = acceptor.accept(plain).await?;
            Ok(Box::new(tls) as BoxedSessionStream)
        })
    }
}
