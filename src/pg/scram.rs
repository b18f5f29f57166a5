//! SCRAM-SHA-256 client (RFC 5802, RFC 7677) without channel binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use super::auth::SaslClient;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name advertised by the server.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header `n,,` base64 encoded, sent back in `c=`.
const CHANNEL_BINDING: &str = "biws";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScramError {
    #[error("server message is not valid UTF-8")]
    NotUtf8,
    #[error("server message lacks attribute {0:?}")]
    MissingAttribute(char),
    #[error("malformed attribute {0:?}")]
    Malformed(char),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
    #[error("server signature does not match")]
    SignatureMismatch,
    #[error("server reported: {0}")]
    ServerError(String),
    #[error("message received out of order")]
    OutOfOrder,
}

enum Stage {
    Start,
    /// client-first sent
    SentFirst,
    /// client-final sent; remember what the server must prove
    SentFinal { expected_signature: [u8; 32] },
    Finished,
}

pub struct ScramClient {
    user: String,
    password: Vec<u8>,
    nonce: String,
    stage: Stage,
}

impl ScramClient {
    pub fn new(user: &str, password: &[u8]) -> Self {
        let raw: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(user, password, BASE64.encode(raw))
    }

    fn with_nonce(user: &str, password: &[u8], nonce: String) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_vec(),
            nonce,
            stage: Stage::Start,
        }
    }

    fn first_bare(&self) -> String {
        format!("n={},r={}", escape_name(&self.user), self.nonce)
    }

    fn build_final(&mut self, server_first: &[u8]) -> std::result::Result<Vec<u8>, ScramError> {
        if !matches!(self.stage, Stage::SentFirst) {
            return Err(ScramError::OutOfOrder);
        }
        let server_first = std::str::from_utf8(server_first).map_err(|_| ScramError::NotUtf8)?;
        let attrs = Attributes::parse(server_first)?;

        let nonce = attrs.require('r')?;
        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ScramError::NonceMismatch);
        }
        let salt = BASE64
            .decode(attrs.require('s')?)
            .map_err(|_| ScramError::Malformed('s'))?;
        let iterations = attrs
            .require('i')?
            .parse::<u32>()
            .ok()
            .filter(|&i| i > 0)
            .ok_or(ScramError::Malformed('i'))?;

        let salted = salted_password(&self.password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("c={},r={}", CHANNEL_BINDING, nonce);
        let auth_message = format!("{},{},{}", self.first_bare(), server_first, without_proof);

        let signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        proof.iter_mut().zip(signature).for_each(|(p, s)| *p ^= s);

        let server_key = hmac(&salted, b"Server Key");
        self.stage = Stage::SentFinal {
            expected_signature: hmac(&server_key, auth_message.as_bytes()),
        };
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    fn check_final(&mut self, server_final: &[u8]) -> std::result::Result<(), ScramError> {
        let Stage::SentFinal { expected_signature } = self.stage else {
            return Err(ScramError::OutOfOrder);
        };
        let server_final = std::str::from_utf8(server_final).map_err(|_| ScramError::NotUtf8)?;
        let attrs = Attributes::parse(server_final)?;
        if let Some(e) = attrs.get('e') {
            return Err(ScramError::ServerError(e.to_string()));
        }
        let signature = BASE64
            .decode(attrs.require('v')?)
            .map_err(|_| ScramError::Malformed('v'))?;
        if signature != expected_signature {
            return Err(ScramError::SignatureMismatch);
        }
        self.stage = Stage::Finished;
        Ok(())
    }
}

impl SaslClient for ScramClient {
    fn mechanism(&self) -> &str {
        SCRAM_SHA_256
    }

    fn client_first(&mut self) -> Vec<u8> {
        self.stage = Stage::SentFirst;
        format!("n,,{}", self.first_bare()).into_bytes()
    }

    fn server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.build_final(data)
            .map_err(|e| Error::Interface(format!("SCRAM: {}", e)))
    }

    fn server_final(&mut self, data: &[u8]) -> Result<()> {
        self.check_final(data)
            .map_err(|e| Error::Interface(format!("SCRAM: {}", e)))
    }
}

/// `k=value` pairs of a server message.
struct Attributes<'a>(Vec<(char, &'a str)>);

impl<'a> Attributes<'a> {
    fn parse(message: &'a str) -> std::result::Result<Self, ScramError> {
        message
            .split(',')
            .map(|part| {
                let mut chars = part.chars();
                match (chars.next(), chars.next()) {
                    (Some(key), Some('=')) => Ok((key, chars.as_str())),
                    (Some(key), _) => Err(ScramError::Malformed(key)),
                    (None, _) => Err(ScramError::Malformed(',')),
                }
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Attributes)
    }

    fn get(&self, key: char) -> Option<&'a str> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn require(&self, key: char) -> std::result::Result<&'a str, ScramError> {
        self.get(key).ok_or(ScramError::MissingAttribute(key))
    }
}

/// Hi(): PBKDF2 with HMAC-SHA-256.
fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password, salt, iterations, &mut output)
        .expect("HMAC can take key of any size");
    output
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `,` and `=` are not allowed raw in a saslname.
fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}
