//! X.500 principal identities
//!
//! Every participant, notary and authority in the network is named by a
//! distinguished name. Organisation, locality and country are mandatory;
//! organisational unit, state and common name are optional.
//!
//! The textual form is `CN=..., OU=..., O=..., L=..., ST=..., C=...` with only
//! the present attributes, and parses back into an equal value.

use rcgen::{DistinguishedName, DnType, DnValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

use crate::error::{NetmapError, Result};

/// Upper bound for any single attribute value
const MAX_ATTRIBUTE_LENGTH: usize = 128;

/// A distinguished name identifying a principal on the network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalIdentity {
    common_name: Option<String>,
    organisation_unit: Option<String>,
    organisation: String,
    locality: String,
    state: Option<String>,
    country: String,
}

impl PrincipalIdentity {
    /// Create a principal from its mandatory attributes
    pub fn new(
        organisation: impl Into<String>,
        locality: impl Into<String>,
        country: impl Into<String>,
    ) -> Result<Self> {
        let principal = Self {
            common_name: None,
            organisation_unit: None,
            organisation: organisation.into(),
            locality: locality.into(),
            state: None,
            country: country.into(),
        };
        principal.validate()?;
        Ok(principal)
    }

    /// Set the common name
    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Result<Self> {
        self.common_name = Some(common_name.into());
        self.validate()?;
        Ok(self)
    }

    /// Set the organisational unit
    pub fn with_organisation_unit(mut self, unit: impl Into<String>) -> Result<Self> {
        self.organisation_unit = Some(unit.into());
        self.validate()?;
        Ok(self)
    }

    /// Set the state or province
    pub fn with_state(mut self, state: impl Into<String>) -> Result<Self> {
        self.state = Some(state.into());
        self.validate()?;
        Ok(self)
    }

    /// Parse a principal from its textual form, e.g. `O=Alice, L=London, C=GB`
    pub fn parse(text: &str) -> Result<Self> {
        let mut common_name = None;
        let mut organisation_unit = None;
        let mut organisation = None;
        let mut locality = None;
        let mut state = None;
        let mut country = None;

        for part in text.split(',') {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                NetmapError::InvalidPrincipal(format!("Attribute without '=': '{}'", part.trim()))
            })?;
            let value = value.trim().to_string();
            let slot = match key.trim().to_ascii_uppercase().as_str() {
                "CN" => &mut common_name,
                "OU" => &mut organisation_unit,
                "O" => &mut organisation,
                "L" => &mut locality,
                "ST" => &mut state,
                "C" => &mut country,
                other => {
                    return Err(NetmapError::InvalidPrincipal(format!(
                        "Unsupported attribute: {}",
                        other
                    )))
                }
            };
            if slot.replace(value).is_some() {
                return Err(NetmapError::InvalidPrincipal(format!(
                    "Duplicate attribute: {}",
                    key.trim()
                )));
            }
        }

        let principal = Self {
            common_name,
            organisation_unit,
            organisation: organisation.ok_or_else(|| missing("organisation (O)"))?,
            locality: locality.ok_or_else(|| missing("locality (L)"))?,
            state,
            country: country.ok_or_else(|| missing("country (C)"))?,
        };
        principal.validate()?;
        Ok(principal)
    }

    /// Build a principal from an X.509 subject or issuer name
    pub fn from_x509_name(name: &X509Name<'_>) -> Result<Self> {
        fn first<'a, 'b: 'a>(
            mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
        ) -> Result<Option<String>> {
            match attrs.next() {
                Some(attr) => attr
                    .as_str()
                    .map(|s| Some(s.to_string()))
                    .map_err(NetmapError::from),
                None => Ok(None),
            }
        }

        let principal = Self {
            common_name: first(name.iter_common_name())?,
            organisation_unit: first(name.iter_organizational_unit())?,
            organisation: first(name.iter_organization())?
                .ok_or_else(|| missing("organisation (O)"))?,
            locality: first(name.iter_locality())?.ok_or_else(|| missing("locality (L)"))?,
            state: first(name.iter_state_or_province())?,
            country: first(name.iter_country())?.ok_or_else(|| missing("country (C)"))?,
        };
        principal.validate()?;
        Ok(principal)
    }

    /// Convert to an rcgen distinguished name for certificate construction
    pub fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, DnValue::Utf8String(self.country.clone()));
        if let Some(state) = &self.state {
            dn.push(DnType::StateOrProvinceName, DnValue::Utf8String(state.clone()));
        }
        dn.push(DnType::LocalityName, DnValue::Utf8String(self.locality.clone()));
        dn.push(DnType::OrganizationName, DnValue::Utf8String(self.organisation.clone()));
        if let Some(unit) = &self.organisation_unit {
            dn.push(DnType::OrganizationalUnitName, DnValue::Utf8String(unit.clone()));
        }
        if let Some(cn) = &self.common_name {
            dn.push(DnType::CommonName, DnValue::Utf8String(cn.clone()));
        }
        dn
    }

    /// The same principal with its common name stripped
    ///
    /// This is the subtree a node CA certificate is constrained to.
    pub fn without_common_name(&self) -> Self {
        Self {
            common_name: None,
            ..self.clone()
        }
    }

    /// Whether this principal lies within the directory subtree `subtree`
    ///
    /// Every attribute present in `subtree` must be present in `self` with an
    /// equal value. Attributes absent from `subtree` are unconstrained.
    pub fn is_within(&self, subtree: &PrincipalIdentity) -> bool {
        fn optional_matches(own: &Option<String>, constraint: &Option<String>) -> bool {
            match constraint {
                Some(required) => own.as_deref() == Some(required.as_str()),
                None => true,
            }
        }

        self.organisation == subtree.organisation
            && self.locality == subtree.locality
            && self.country == subtree.country
            && optional_matches(&self.organisation_unit, &subtree.organisation_unit)
            && optional_matches(&self.state, &subtree.state)
            && optional_matches(&self.common_name, &subtree.common_name)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn organisation_unit(&self) -> Option<&str> {
        self.organisation_unit.as_deref()
    }

    pub fn organisation(&self) -> &str {
        &self.organisation
    }

    pub fn locality(&self) -> &str {
        &self.locality
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    fn validate(&self) -> Result<()> {
        check_attribute("organisation", &self.organisation)?;
        check_attribute("locality", &self.locality)?;
        check_attribute("country", &self.country)?;
        for (label, value) in [
            ("common name", &self.common_name),
            ("organisation unit", &self.organisation_unit),
            ("state", &self.state),
        ] {
            if let Some(value) = value {
                check_attribute(label, value)?;
            }
        }

        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(NetmapError::InvalidPrincipal(format!(
                "Country must be a two-letter upper-case code, got '{}'",
                self.country
            )));
        }
        Ok(())
    }
}

fn missing(attribute: &str) -> NetmapError {
    NetmapError::InvalidPrincipal(format!("Missing mandatory attribute: {}", attribute))
}

fn check_attribute(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NetmapError::InvalidPrincipal(format!("{} must not be blank", label)));
    }
    if value.trim() != value {
        return Err(NetmapError::InvalidPrincipal(format!(
            "{} has leading or trailing whitespace",
            label
        )));
    }
    if value.len() > MAX_ATTRIBUTE_LENGTH {
        return Err(NetmapError::InvalidPrincipal(format!(
            "{} exceeds {} characters",
            label, MAX_ATTRIBUTE_LENGTH
        )));
    }
    if value.contains([',', '=']) {
        return Err(NetmapError::InvalidPrincipal(format!(
            "{} must not contain ',' or '='",
            label
        )));
    }
    Ok(())
}

impl fmt::Display for PrincipalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(6);
        if let Some(cn) = &self.common_name {
            parts.push(format!("CN={}", cn));
        }
        if let Some(unit) = &self.organisation_unit {
            parts.push(format!("OU={}", unit));
        }
        parts.push(format!("O={}", self.organisation));
        parts.push(format!("L={}", self.locality));
        if let Some(state) = &self.state {
            parts.push(format!("ST={}", state));
        }
        parts.push(format!("C={}", self.country));
        f.write_str(&parts.join(", "))
    }
}

impl FromStr for PrincipalIdentity {
    type Err = NetmapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrincipalIdentity {
    type Error = NetmapError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PrincipalIdentity> for String {
    fn from(principal: PrincipalIdentity) -> Self {
        principal.to_string()
    }
}
