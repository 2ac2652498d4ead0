//! Assembly identities of compiled assemblies.
//!
//! An [`AssemblyIdentity`] is the `{name, version, culture, public key}` tuple a compilation
//! produces once its signing configuration is resolved. Its public key token is derived rather
//! than stored, so the identity can never disagree with its key.

use std::{fmt, fmt::Write as _, str::FromStr};

use crate::{metadata::identity::token::PublicKeyToken, Error, Result};

/// Four-part version numbering for .NET assemblies.
///
/// # Examples
///
/// ```rust
/// use dotsign::metadata::identity::AssemblyVersion;
///
/// let version = AssemblyVersion::parse("1.2")?;
/// assert_eq!(version, AssemblyVersion::new(1, 2, 0, 0));
/// assert_eq!(version.to_string(), "1.2.0.0");
/// # Ok::<(), dotsign::Error>(())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssemblyVersion {
    /// Major version component.
    pub major: u16,
    /// Minor version component.
    pub minor: u16,
    /// Build version component.
    pub build: u16,
    /// Revision version component.
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse one to four dot-separated components; missing components are zero.
    ///
    /// # Errors
    /// Returns an error if the version string has an invalid format.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.split('.').collect();

        if parts.is_empty() || parts.len() > 4 {
            return Err(malformed_error!("Invalid version format: {}", version_str));
        }

        let mut components = [0u16; 4];

        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .trim()
                .parse::<u16>()
                .map_err(|_| malformed_error!("Invalid version component: {}", part))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The identity of an assembly.
///
/// An identity is strong-named iff its public key is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    name: String,
    version: AssemblyVersion,
    culture: Option<String>,
    public_key: Vec<u8>,
}

impl AssemblyIdentity {
    /// Create an identity.
    ///
    /// `culture` of `None` (or `"neutral"`) denotes a culture-neutral assembly. An empty
    /// `public_key` denotes an assembly that is not strong-named.
    pub fn new(
        name: impl Into<String>,
        version: AssemblyVersion,
        culture: Option<String>,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            culture: culture.filter(|c| !c.is_empty() && c != "neutral"),
            public_key,
        }
    }

    /// Simple assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assembly version.
    #[must_use]
    pub fn version(&self) -> AssemblyVersion {
        self.version
    }

    /// Culture, or `None` if culture-neutral.
    #[must_use]
    pub fn culture(&self) -> Option<&str> {
        self.culture.as_deref()
    }

    /// Full public key blob, empty if not strong-named.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key token, `None` if not strong-named.
    #[must_use]
    pub fn public_key_token(&self) -> Option<PublicKeyToken> {
        PublicKeyToken::compute(&self.public_key)
    }

    /// Returns true if the identity carries a public key.
    #[must_use]
    pub fn is_strong_named(&self) -> bool {
        !self.public_key.is_empty()
    }

    /// The display name, e.g.
    /// `Paul, Version=0.0.0.0, Culture=neutral, PublicKeyToken=ce65828c82a341f2`.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);

        result.push_str(&self.name);
        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match self.public_key_token() {
            Some(token) => {
                let _ = write!(result, "{token}");
            }
            None => result.push_str("null"),
        }

        result
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Computes the identity of the assembly under compilation.
///
/// # Examples
///
/// ```rust
/// use dotsign::metadata::identity::{AssemblyIdentityBuilder, AssemblyVersion};
///
/// let identity = AssemblyIdentityBuilder::new("Paul")
///     .version(AssemblyVersion::new(1, 0, 0, 0))
///     .build();
/// assert_eq!(
///     identity.display_name(),
///     "Paul, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct AssemblyIdentityBuilder {
    name: String,
    version: AssemblyVersion,
    culture: Option<String>,
    public_key: Vec<u8>,
}

impl AssemblyIdentityBuilder {
    /// Start an identity with the given simple name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the version.
    #[must_use]
    pub fn version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the culture.
    #[must_use]
    pub fn culture(mut self, culture: Option<String>) -> Self {
        self.culture = culture;
        self
    }

    /// Set the public key resolved by the signing decision.
    #[must_use]
    pub fn public_key(mut self, public_key: &[u8]) -> Self {
        self.public_key = public_key.to_vec();
        self
    }

    /// Finish the identity.
    #[must_use]
    pub fn build(self) -> AssemblyIdentity {
        AssemblyIdentity::new(self.name, self.version, self.culture, self.public_key)
    }
}
