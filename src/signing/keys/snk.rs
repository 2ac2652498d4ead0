//! CryptoAPI RSA key blobs as found in `.snk` files and assembly public keys.
//!
//! Three encodings are accepted by [`KeyBlob::parse`]:
//!
//! - A `PRIVATEKEYBLOB` (`0x07`, magic `RSA2`), the content of a key pair `.snk` file
//! - A `PUBLICKEYBLOB` (`0x06`, magic `RSA1`) without any prefix
//! - The strong-name public key form: a 12-byte header (`SigAlgId`, `HashAlgId`,
//!   `cbPublicKey`) followed by a `PUBLICKEYBLOB`. This is what assemblies store in their
//!   `Assembly.PublicKey` column and what `CryptoPublicKey` carries
//!
//! All integers inside the blobs are little-endian, including the RSA modulus and the CRT
//! components.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotsign::signing::keys::snk::{is_valid_public_key, KeyBlob};
//!
//! let snk = std::fs::read("key.snk")?;
//! let blob = KeyBlob::parse(&snk)?;
//! assert!(blob.has_private_key());
//!
//! let public_key = blob.public_key_blob();
//! assert!(is_valid_public_key(&public_key));
//! # Ok::<(), dotsign::Error>(())
//! ```

use crate::{
    file::{io::write_le_at, parser::Parser},
    Error::Empty,
    Result,
};

/// `CALG_RSA_SIGN`
pub const CALG_RSA_SIGN: u32 = 0x0000_2400;
/// `CALG_RSA_KEYX`
pub const CALG_RSA_KEYX: u32 = 0x0000_A400;
/// `CALG_SHA1`
pub const CALG_SHA1: u32 = 0x0000_8004;

const PUBLIC_KEY_BLOB: u8 = 0x06;
const PRIVATE_KEY_BLOB: u8 = 0x07;
const BLOB_VERSION: u8 = 0x02;
const RSA1_MAGIC: u32 = 0x3141_5352;
const RSA2_MAGIC: u32 = 0x3241_5352;

/// Size of the `SigAlgId`/`HashAlgId`/`cbPublicKey` prefix of a strong-name public key.
pub const PUBLIC_KEY_HEADER_SIZE: usize = 12;
/// Size of `BLOBHEADER` plus `RSAPUBKEY`.
const RSA_BLOB_HEADER_SIZE: usize = 20;

/// The ECMA standard public key, used by framework assemblies.
pub const ECMA_PUBLIC_KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

const ALG_CLASS_MASK: u32 = 0x7 << 13;
const ALG_CLASS_SIGNATURE: u32 = 1 << 13;
const ALG_CLASS_HASH: u32 = 4 << 13;
const ALG_SID_MASK: u32 = 0x1FF;
const ALG_SID_SHA1: u32 = 4;

/// CRT components of an RSA private key, little-endian as stored in a `PRIVATEKEYBLOB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateParts {
    /// `p`
    pub prime1: Vec<u8>,
    /// `q`
    pub prime2: Vec<u8>,
    /// `d mod (p - 1)`
    pub exponent1: Vec<u8>,
    /// `d mod (q - 1)`
    pub exponent2: Vec<u8>,
    /// `q^-1 mod p`
    pub coefficient: Vec<u8>,
    /// `d`
    pub private_exponent: Vec<u8>,
}

/// A decoded RSA key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    bit_len: u32,
    exponent: u32,
    modulus: Vec<u8>,
    private: Option<PrivateParts>,
}

impl KeyBlob {
    /// Assemble a key from its components.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the bit length is not a positive multiple of 16
    /// or the component lengths disagree with it.
    pub fn from_parts(
        bit_len: u32,
        exponent: u32,
        modulus: Vec<u8>,
        private: Option<PrivateParts>,
    ) -> Result<KeyBlob> {
        if bit_len == 0 || bit_len % 16 != 0 {
            return Err(malformed_error!("Invalid RSA key length - {}", bit_len));
        }

        let modulus_len = bit_len as usize / 8;
        let half_len = modulus_len / 2;
        if modulus.len() != modulus_len {
            return Err(malformed_error!(
                "RSA modulus length mismatch - expected {}, got {}",
                modulus_len,
                modulus.len()
            ));
        }

        if let Some(parts) = &private {
            let halves = [
                &parts.prime1,
                &parts.prime2,
                &parts.exponent1,
                &parts.exponent2,
                &parts.coefficient,
            ];
            if halves.iter().any(|part| part.len() != half_len)
                || parts.private_exponent.len() != modulus_len
            {
                return Err(malformed_error!("RSA private key component length mismatch"));
            }
        }

        Ok(KeyBlob {
            bit_len,
            exponent,
            modulus,
            private,
        })
    }

    /// Decode a key pair, bare public key blob, or strong-name public key.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input and [`crate::Error::Malformed`] or
    /// [`crate::Error::OutOfBounds`] for anything that is not a well-formed RSA blob.
    pub fn parse(data: &[u8]) -> Result<KeyBlob> {
        match data.first() {
            None => Err(Empty),
            Some(&PRIVATE_KEY_BLOB) | Some(&PUBLIC_KEY_BLOB) => Self::parse_rsa_blob(data),
            Some(_) => {
                let blob = Self::strip_public_key_header(data)?;
                if blob.first() != Some(&PUBLIC_KEY_BLOB) {
                    return Err(malformed_error!("Public key does not contain a PUBLICKEYBLOB"));
                }
                Self::parse_rsa_blob(blob)
            }
        }
    }

    fn strip_public_key_header(data: &[u8]) -> Result<&[u8]> {
        let mut parser = Parser::new(data);
        let _sig_alg_id = parser.read_le::<u32>()?;
        let _hash_alg_id = parser.read_le::<u32>()?;
        let cb_public_key = parser.read_le::<u32>()? as usize;
        if cb_public_key != parser.remaining() {
            return Err(malformed_error!(
                "Public key size mismatch - header says {}, {} bytes follow",
                cb_public_key,
                parser.remaining()
            ));
        }
        parser.read_bytes(cb_public_key)
    }

    fn parse_rsa_blob(data: &[u8]) -> Result<KeyBlob> {
        let mut parser = Parser::new(data);

        let blob_type = parser.read_le::<u8>()?;
        let version = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u16>()?;
        let alg_id = parser.read_le::<u32>()?;
        if version != BLOB_VERSION {
            return Err(malformed_error!("Unsupported key blob version - {}", version));
        }
        if alg_id != CALG_RSA_SIGN && alg_id != CALG_RSA_KEYX {
            return Err(malformed_error!("Unsupported key algorithm - {:#x}", alg_id));
        }

        let magic = parser.read_le::<u32>()?;
        let expected_magic = if blob_type == PRIVATE_KEY_BLOB {
            RSA2_MAGIC
        } else {
            RSA1_MAGIC
        };
        if magic != expected_magic {
            return Err(malformed_error!("Invalid RSA key magic - {:#x}", magic));
        }

        let bit_len = parser.read_le::<u32>()?;
        let exponent = parser.read_le::<u32>()?;
        if bit_len == 0 || bit_len % 16 != 0 {
            return Err(malformed_error!("Invalid RSA key length - {}", bit_len));
        }

        let modulus_len = bit_len as usize / 8;
        let half_len = modulus_len / 2;
        let modulus = parser.read_bytes(modulus_len)?.to_vec();

        let private = if blob_type == PRIVATE_KEY_BLOB {
            Some(PrivateParts {
                prime1: parser.read_bytes(half_len)?.to_vec(),
                prime2: parser.read_bytes(half_len)?.to_vec(),
                exponent1: parser.read_bytes(half_len)?.to_vec(),
                exponent2: parser.read_bytes(half_len)?.to_vec(),
                coefficient: parser.read_bytes(half_len)?.to_vec(),
                private_exponent: parser.read_bytes(modulus_len)?.to_vec(),
            })
        } else {
            None
        };

        Self::from_parts(bit_len, exponent, modulus, private)
    }

    /// Key size in bits.
    #[must_use]
    pub fn bit_len(&self) -> u32 {
        self.bit_len
    }

    /// Size of the modulus, and therefore of a signature, in bytes.
    #[must_use]
    pub fn modulus_len(&self) -> usize {
        self.modulus.len()
    }

    /// Public exponent.
    #[must_use]
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// Little-endian modulus.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Returns true if the blob carries the private half.
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private.is_some()
    }

    /// Private key components, if present.
    #[must_use]
    pub fn private_parts(&self) -> Option<&PrivateParts> {
        self.private.as_ref()
    }

    /// This key without its private half.
    #[must_use]
    pub fn to_public(&self) -> KeyBlob {
        KeyBlob {
            bit_len: self.bit_len,
            exponent: self.exponent,
            modulus: self.modulus.clone(),
            private: None,
        }
    }

    /// The strong-name public key form (12-byte header followed by a `PUBLICKEYBLOB`).
    #[must_use]
    pub fn public_key_blob(&self) -> Vec<u8> {
        let rsa_len = RSA_BLOB_HEADER_SIZE + self.modulus.len();
        let mut out = vec![0u8; PUBLIC_KEY_HEADER_SIZE + rsa_len];
        let mut offset = 0;

        // Infallible: the buffer is sized for exactly these fields
        let _ = write_le_at(&mut out, &mut offset, CALG_RSA_SIGN);
        let _ = write_le_at(&mut out, &mut offset, CALG_SHA1);
        let _ = write_le_at(&mut out, &mut offset, rsa_len as u32);
        let _ = self.write_rsa_header(&mut out, &mut offset, PUBLIC_KEY_BLOB, RSA1_MAGIC);
        out[offset..].copy_from_slice(&self.modulus);

        out
    }

    /// Serialize as a key pair `.snk`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if this blob has no private half.
    pub fn to_snk(&self) -> Result<Vec<u8>> {
        let Some(parts) = &self.private else {
            return Err(malformed_error!("Key blob has no private key"));
        };

        let mut out = vec![0u8; RSA_BLOB_HEADER_SIZE];
        let mut offset = 0;
        self.write_rsa_header(&mut out, &mut offset, PRIVATE_KEY_BLOB, RSA2_MAGIC)?;

        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&parts.prime1);
        out.extend_from_slice(&parts.prime2);
        out.extend_from_slice(&parts.exponent1);
        out.extend_from_slice(&parts.exponent2);
        out.extend_from_slice(&parts.coefficient);
        out.extend_from_slice(&parts.private_exponent);

        Ok(out)
    }

    fn write_rsa_header(
        &self,
        out: &mut [u8],
        offset: &mut usize,
        blob_type: u8,
        magic: u32,
    ) -> Result<()> {
        write_le_at(out, offset, blob_type)?;
        write_le_at(out, offset, BLOB_VERSION)?;
        write_le_at(out, offset, 0_u16)?;
        write_le_at(out, offset, CALG_RSA_SIGN)?;
        write_le_at(out, offset, magic)?;
        write_le_at(out, offset, self.bit_len)?;
        write_le_at(out, offset, self.exponent)?;
        Ok(())
    }
}

fn is_valid_alg_ids(sig_alg_id: u32, hash_alg_id: u32) -> bool {
    let sig_ok = sig_alg_id == 0 || sig_alg_id & ALG_CLASS_MASK == ALG_CLASS_SIGNATURE;
    let hash_ok = hash_alg_id == 0
        || (hash_alg_id & ALG_CLASS_MASK == ALG_CLASS_HASH
            && hash_alg_id & ALG_SID_MASK >= ALG_SID_SHA1);
    sig_ok && hash_ok
}

/// Returns true if `blob` is usable as an assembly public key.
///
/// Accepts the ECMA standard key and any strong-name public key whose header is consistent and
/// whose payload is a `PUBLICKEYBLOB`.
#[must_use]
pub fn is_valid_public_key(blob: &[u8]) -> bool {
    if blob == ECMA_PUBLIC_KEY {
        return true;
    }

    if blob.len() < PUBLIC_KEY_HEADER_SIZE + 1 {
        return false;
    }

    let mut parser = Parser::new(blob);
    let (Ok(sig_alg_id), Ok(hash_alg_id), Ok(cb_public_key)) = (
        parser.read_le::<u32>(),
        parser.read_le::<u32>(),
        parser.read_le::<u32>(),
    ) else {
        return false;
    };

    if blob.len() != PUBLIC_KEY_HEADER_SIZE + cb_public_key as usize {
        return false;
    }

    if blob[PUBLIC_KEY_HEADER_SIZE] != PUBLIC_KEY_BLOB {
        return false;
    }

    is_valid_alg_ids(sig_alg_id, hash_alg_id)
}
