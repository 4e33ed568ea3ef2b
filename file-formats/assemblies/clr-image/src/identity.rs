//! Assembly identities and references

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Four part assembly version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl Version {
    /// Create a version from its four parts
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parse `major[.minor[.build[.revision]]]`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for part in s.split('.') {
            if count == parts.len() {
                return Err(Error::invalid_format(format!("too many version parts in {s:?}")));
            }
            parts[count] = part
                .trim()
                .parse()
                .map_err(|_| Error::invalid_format(format!("bad version component {part:?}")))?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Declared identity of an assembly (its Assembly table row)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `Assembly-CSharp`
    pub name: String,
    /// Assembly version
    pub version: Version,
    /// Culture, `None` for culture-neutral assemblies
    pub culture: Option<String>,
    /// Assembly flags (`AssemblyFlags`)
    pub flags: u32,
    /// Full public key, empty for unsigned assemblies
    pub public_key: Vec<u8>,
}

impl AssemblyIdentity {
    /// A culture-neutral, unsigned identity
    pub fn new<S: Into<String>>(name: S, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            culture: None,
            flags: 0,
            public_key: Vec::new(),
        }
    }

    /// A reference that would bind to this identity
    pub fn to_reference(&self) -> AssemblyReference {
        AssemblyReference {
            name: self.name.clone(),
            version: self.version,
            culture: self.culture.clone(),
            flags: 0,
            public_key_or_token: Vec::new(),
        }
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral")
        )
    }
}

/// A reference to another assembly (an AssemblyRef table row)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyReference {
    /// Simple name of the referenced assembly
    pub name: String,
    /// Requested version
    pub version: Version,
    /// Requested culture, `None` for neutral
    pub culture: Option<String>,
    /// Reference flags; bit 0 set means `public_key_or_token` is a full key
    pub flags: u32,
    /// Public key or its 8 byte token, empty when unsigned
    pub public_key_or_token: Vec<u8>,
}

impl AssemblyReference {
    /// A version-less, neutral reference by simple name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            version: Version::default(),
            culture: None,
            flags: 0,
            public_key_or_token: Vec::new(),
        }
    }

    /// Set the requested version
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the requested culture
    pub fn with_culture<S: Into<String>>(mut self, culture: S) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Set the public key token
    pub fn with_public_key_token(mut self, token: [u8; 8]) -> Self {
        self.public_key_or_token = token.to_vec();
        self.flags &= !0x0001;
        self
    }

    /// Candidate file names for this reference, in probing order
    pub fn candidate_file_names(&self) -> [String; 2] {
        [format!("{}.dll", self.name), format!("{}.exe", self.name)]
    }
}

impl fmt::Display for AssemblyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral")
        )
    }
}
