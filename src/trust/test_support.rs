// src/trust/test_support.rs

//! Throwaway OpenPGP signers for unit tests

use openpgp::cert::CertBuilder;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{Message, Signer};
use openpgp::serialize::SerializeInto;
use openpgp::Cert;
use sequoia_openpgp as openpgp;
use std::io::Write;

pub(crate) fn generate_signer(name: &str) -> Cert {
    let (cert, _revocation) = CertBuilder::new()
        .add_userid(format!("{name} <{name}@example.org>"))
        .add_signing_subkey()
        .generate()
        .unwrap();
    cert
}

pub(crate) fn public_key_bytes(cert: &Cert) -> Vec<u8> {
    cert.armored().to_vec().unwrap()
}

pub(crate) fn sign_detached(cert: &Cert, data: &[u8]) -> Vec<u8> {
    let policy = StandardPolicy::new();
    let keypair = cert
        .keys()
        .unencrypted_secret()
        .with_policy(&policy, None)
        .alive()
        .revoked(false)
        .for_signing()
        .next()
        .unwrap()
        .key()
        .clone()
        .into_keypair()
        .unwrap();

    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let mut signer = Signer::new(message, keypair).detached().build().unwrap();
        signer.write_all(data).unwrap();
        signer.finalize().unwrap();
    }
    sink
}
