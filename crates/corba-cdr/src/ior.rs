//! Interoperable Object References
//!
//! ```text
//! IOR:
//! +-----------+---------------------------------------------+
//! | string    | sequence<TaggedProfile>                     |
//! | type_id   |   ulong tag, sequence<octet> profile_data   |
//! +-----------+---------------------------------------------+
//!
//! IIOP profile_data (encapsulation):
//! +------+-------+-------+--------+------+------------+-------------------+
//! | flag | major | minor | string | ushort | seq<octet> | components (1.1+) |
//! |      |       |       | host   | port   | object_key |                   |
//! +------+-------+-------+--------+------+------------+-------------------+
//! ```
//!
//! The stringified form is `IOR:` followed by the hex of a byte-order
//! octet and the IOR itself.

use crate::context::CdrContext;
use crate::decode::{CdrDecode, CdrReader};
use crate::encode::{CdrEncode, CdrWriter};
use crate::error::{CdrError, Result};
use std::fmt;
use std::str::FromStr;

/// Profile tag for IIOP
pub const TAG_INTERNET_IOP: u32 = 0;

const STRINGIFIED_PREFIX: &str = "IOR:";

/// One addressing profile, still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedProfile {
    pub tag: u32,
    pub data: Vec<u8>,
}

/// Decoded IIOP profile body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IiopProfile {
    pub major: u8,
    pub minor: u8,
    pub host: String,
    pub port: u16,
    pub object_key: Vec<u8>,
}

impl IiopProfile {
    pub fn to_tagged(&self) -> Result<TaggedProfile> {
        let ctx = CdrContext::native();
        let mut w = CdrWriter::new(ctx);
        w.write_octet(ctx.flag());
        w.write_octet(self.major);
        w.write_octet(self.minor);
        w.write_string(&self.host)?;
        w.write_ushort(self.port);
        w.write_octets(&self.object_key)?;
        if self.minor >= 1 {
            // no tagged components
            w.write_ulong(0);
        }
        Ok(TaggedProfile {
            tag: TAG_INTERNET_IOP,
            data: w.into_inner().to_vec(),
        })
    }

    pub fn from_tagged(profile: &TaggedProfile) -> Result<Self> {
        if profile.tag != TAG_INTERNET_IOP {
            return Err(CdrError::InvalidIor(format!(
                "profile tag {} is not IIOP",
                profile.tag
            )));
        }
        let mut r = CdrReader::new(&profile.data, CdrContext::native());
        let flag = r.read_octet()?;
        if flag > 1 {
            return Err(CdrError::InvalidEncapsulation(format!(
                "byte order flag {}",
                flag
            )));
        }
        r.set_byte_order(flag == 1);
        let major = r.read_octet()?;
        let minor = r.read_octet()?;
        let host = r.read_string()?;
        let port = r.read_ushort()?;
        let object_key = r.read_octets()?;
        // components, if any, are ignored
        Ok(Self {
            major,
            minor,
            host,
            port,
            object_key,
        })
    }
}

/// An object reference as exchanged between ORBs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ior {
    pub type_id: String,
    pub profiles: Vec<TaggedProfile>,
}

impl Ior {
    /// The nil reference: empty type id and no profiles
    pub fn nil() -> Self {
        Self::default()
    }

    pub fn is_nil(&self) -> bool {
        self.type_id.is_empty() && self.profiles.is_empty()
    }

    /// Reference with a single IIOP profile
    pub fn with_iiop(type_id: impl Into<String>, profile: IiopProfile) -> Result<Self> {
        Ok(Self {
            type_id: type_id.into(),
            profiles: vec![profile.to_tagged()?],
        })
    }

    /// First decodable IIOP profile
    pub fn iiop(&self) -> Option<IiopProfile> {
        self.profiles
            .iter()
            .filter(|p| p.tag == TAG_INTERNET_IOP)
            .find_map(|p| IiopProfile::from_tagged(p).ok())
    }

    pub fn object_key(&self) -> Option<Vec<u8>> {
        self.iiop().map(|p| p.object_key)
    }

    pub fn to_stringified(&self) -> Result<String> {
        let ctx = CdrContext::native();
        let mut w = CdrWriter::new(ctx);
        w.write_octet(ctx.flag());
        w.write(self)?;
        let mut out = String::with_capacity(STRINGIFIED_PREFIX.len() + w.len() * 2);
        out.push_str(STRINGIFIED_PREFIX);
        for byte in w.as_bytes() {
            out.push_str(&format!("{:02x}", byte));
        }
        Ok(out)
    }
}

fn hex_digit(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(CdrError::InvalidIor(format!("bad hex digit {:?}", c as char))),
    }
}

impl FromStr for Ior {
    type Err = CdrError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let hex = match s.get(..STRINGIFIED_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(STRINGIFIED_PREFIX) => {
                &s[STRINGIFIED_PREFIX.len()..]
            }
            _ => return Err(CdrError::InvalidIor("missing IOR: prefix".into())),
        };
        if hex.len() % 2 != 0 || hex.is_empty() {
            return Err(CdrError::InvalidIor("odd or empty hex body".into()));
        }
        let bytes = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| Ok(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
            .collect::<Result<Vec<u8>>>()?;

        let flag = bytes[0];
        if flag > 1 {
            return Err(CdrError::InvalidIor(format!("byte order flag {}", flag)));
        }
        let mut r = CdrReader::new(&bytes, CdrContext::with_byte_order(flag == 1));
        r.read_octet()?;
        r.read()
    }
}

impl fmt::Display for Ior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_stringified() {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "IOR<{}>", self.type_id),
        }
    }
}

impl CdrEncode for TaggedProfile {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        w.write_ulong(self.tag);
        w.write_octets(&self.data)
    }
}

impl CdrDecode for TaggedProfile {
    fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self> {
        Ok(Self {
            tag: r.read_ulong()?,
            data: r.read_octets()?,
        })
    }
}

impl CdrEncode for Ior {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        w.write_string(&self.type_id)?;
        w.write(&self.profiles)
    }
}

impl CdrDecode for Ior {
    fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self> {
        Ok(Self {
            type_id: r.read_string()?,
            profiles: r.read()?,
        })
    }
}
