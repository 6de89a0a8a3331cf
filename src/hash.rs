use crate::errors::*;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms advertised in an apt Release file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 4] = [
        HashAlgo::Md5,
        HashAlgo::Sha1,
        HashAlgo::Sha256,
        HashAlgo::Sha512,
    ];

    /// Name of the checksum section in Release, also used as by-hash directory name
    pub fn section(&self) -> &'static str {
        match self {
            HashAlgo::Md5 => "MD5Sum",
            HashAlgo::Sha1 => "SHA1",
            HashAlgo::Sha256 => "SHA256",
            HashAlgo::Sha512 => "SHA512",
        }
    }

    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            HashAlgo::Md5 => hex::encode(Md5::digest(data)),
            HashAlgo::Sha1 => hex::encode(Sha1::digest(data)),
            HashAlgo::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgo::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        w.write_str(self.section())
    }
}

impl FromStr for HashAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HashAlgo::ALL
            .into_iter()
            .find(|algo| algo.section() == s)
            .with_context(|| anyhow!("Unknown hash algorithm: {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests() {
        assert_eq!(
            HashAlgo::Md5.hex_digest(b"ohai"),
            "5a73678b7b674005056434a48054707d"
        );
        assert_eq!(
            HashAlgo::Sha256.hex_digest(b"ohai"),
            "e84712238709398f6d349dc2250b0efca4b72d8c2bfb7b74339d30ba94056b14"
        );
        assert_eq!(HashAlgo::Sha1.hex_digest(b"").len(), 40);
        assert_eq!(HashAlgo::Sha512.hex_digest(b"").len(), 128);
    }

    #[test]
    fn test_parse_section() -> Result<()> {
        for algo in HashAlgo::ALL {
            assert_eq!(algo.section().parse::<HashAlgo>()?, algo);
        }
        assert!("SHA384".parse::<HashAlgo>().is_err());
        Ok(())
    }
}
