use crate::{DataverseError, Result};
use core::{fmt, str::FromStr};

/// Oldest major version exposing `RetrieveTotalRecordCount`.
pub const MIN_RECORD_COUNT_MAJOR: u32 = 9;

/// Organization version as reported by `RetrieveVersion()`, e.g.
/// `9.2.24014.198`. Missing trailing components read as zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrgVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl OrgVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    pub const fn supports_record_count(&self) -> bool {
        self.major >= MIN_RECORD_COUNT_MAJOR
    }

    /// # Errors
    ///
    /// Returns [`DataverseError::UnsupportedVersion`] below 9.0.
    pub fn ensure_record_count(&self) -> Result<()> {
        if self.supports_record_count() {
            Ok(())
        } else {
            Err(DataverseError::UnsupportedVersion {
                version: self.to_string(),
            })
        }
    }
}

impl FromStr for OrgVersion {
    type Err = DataverseError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DataverseError::Decode(format!("invalid organization version `{s}`"));

        let mut parts = [0u32; 4];
        let mut count = 0;
        for component in s.trim().split('.') {
            let slot = parts.get_mut(count).ok_or_else(invalid)?;
            *slot = component.parse().map_err(|_| invalid())?;
            count += 1;
        }

        let [major, minor, build, revision] = parts;
        Ok(Self::new(major, minor, build, revision))
    }
}

impl fmt::Display for OrgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_partial_versions() {
        assert_eq!(
            "9.2.24014.198".parse::<OrgVersion>().unwrap(),
            OrgVersion::new(9, 2, 24014, 198)
        );
        assert_eq!("8.2".parse::<OrgVersion>().unwrap(), OrgVersion::new(8, 2, 0, 0));
        assert_eq!(OrgVersion::new(9, 1, 0, 7).to_string(), "9.1.0.7");
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "nine", "9..1", "9.1.2.3.4", "-9"] {
            assert!(input.parse::<OrgVersion>().is_err(), "{input}");
        }
    }

    #[test]
    fn record_count_needs_version_nine() {
        assert!(OrgVersion::new(9, 0, 0, 0).supports_record_count());
        assert!(OrgVersion::new(9, 2, 1, 1).ensure_record_count().is_ok());
        assert!(!OrgVersion::new(8, 2, 9, 9).supports_record_count());
        assert!(matches!(
            OrgVersion::new(8, 2, 0, 0).ensure_record_count(),
            Err(DataverseError::UnsupportedVersion { version }) if version == "8.2.0.0"
        ));
    }
}
