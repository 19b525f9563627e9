// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Generation of the device key pair and certificate signing request.
//!
//! The pairing API signs a PKCS#10 CSR built over a fresh secp256r1 key.
//! Astarte replaces the subject with the device identity, so the CSR carries
//! the placeholder `CN=temporary`.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::pki_types::PrivatePkcs8KeyDer;

const CSR_COMMON_NAME: &str = "temporary";

/// Errors while generating the private key or the CSR.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Failure in the PKI operations.
    #[error("couldn't generate the key pair or the CSR")]
    Generation(#[from] rcgen::Error),
}

/// A fresh private key with the CSR to exchange for a client certificate.
#[derive(Debug)]
pub(crate) struct Bundle {
    /// PKCS#8 encoded private key.
    pub(crate) private_key: PrivatePkcs8KeyDer<'static>,
    /// PEM encoded PKCS#10 certificate signing request.
    pub(crate) csr: String,
}

impl Bundle {
    /// Generates a new EC key pair (secp256r1) and the SHA-256 signed CSR.
    pub(crate) fn new() -> Result<Self, CryptoError> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, CSR_COMMON_NAME);

        let csr = params.serialize_request(&key_pair)?.pem()?;

        let private_key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());

        Ok(Self { private_key, csr })
    }
}
