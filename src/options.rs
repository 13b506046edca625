//! Configuration surface
//!
//! The `-a`, `-c`, `-s` and `-C` option values as typed enums with parsing
//! and validation. Every semantics × extrapolation combination is one model
//! string (`zg:elapsed:extraLU+l` and friends); unknown or unsupported
//! combinations fail with a [`ConfigurationError`] before anything runs.

use std::str::FromStr;

use crate::zg::{ExtrapolationKind, Semantics};

/// Bad or unsupported configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown model `{0}` (expected zg:SEMANTICS:EXTRAPOLATION, e.g. zg:elapsed:extraLU+l)")]
    UnknownModel(String),
    #[error("model family `{0}` is not supported by this build")]
    UnsupportedFamily(String),
    #[error("unknown semantics `{0}` (expected standard|elapsed)")]
    UnknownSemantics(String),
    #[error("unknown extrapolation `{0}`")]
    UnknownExtrapolation(String),
    #[error("unknown cover `{0}` (expected inclusion|alu_g|alu_l|am_g|am_l)")]
    UnknownCover(String),
    #[error("unknown search order `{0}` (expected bfs|dfs)")]
    UnknownSearchOrder(String),
    #[error("unknown certificate `{0}` (expected graph|symbolic|concrete|none)")]
    UnknownCertificate(String),
    #[error("certificate `{0}` is not supported by this build")]
    UnsupportedCertificate(String),
}

/// A parsed `-a` model string: the zone-graph family with its semantics and
/// extrapolation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub semantics: Semantics,
    pub extrapolation: ExtrapolationKind,
}

impl Default for ModelSpec {
    fn default() -> ModelSpec {
        ModelSpec { semantics: Semantics::Elapsed, extrapolation: ExtrapolationKind::LuPlusLocal }
    }
}

impl FromStr for ModelSpec {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<ModelSpec, ConfigurationError> {
        let mut parts = s.split(':');
        let family = parts.next().unwrap_or("");
        match family {
            "zg" => {}
            "async_zg" | "concur19" => {
                return Err(ConfigurationError::UnsupportedFamily(family.to_string()));
            }
            _ => return Err(ConfigurationError::UnknownModel(s.to_string())),
        }
        let semantics = match parts.next() {
            Some("standard") => Semantics::Standard,
            Some("elapsed") => Semantics::Elapsed,
            Some(other) => return Err(ConfigurationError::UnknownSemantics(other.to_string())),
            None => return Err(ConfigurationError::UnknownModel(s.to_string())),
        };
        let extrapolation = match parts.next() {
            Some("NOextra") => ExtrapolationKind::None,
            Some("extraMg") => ExtrapolationKind::MGlobal,
            Some("extraMl") => ExtrapolationKind::MLocal,
            Some("extraM+g") => ExtrapolationKind::MPlusGlobal,
            Some("extraM+l") => ExtrapolationKind::MPlusLocal,
            Some("extraLUg") => ExtrapolationKind::LuGlobal,
            Some("extraLUl") => ExtrapolationKind::LuLocal,
            Some("extraLU+g") => ExtrapolationKind::LuPlusGlobal,
            Some("extraLU+l") => ExtrapolationKind::LuPlusLocal,
            Some(other) => return Err(ConfigurationError::UnknownExtrapolation(other.to_string())),
            None => return Err(ConfigurationError::UnknownModel(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(ConfigurationError::UnknownModel(s.to_string()));
        }
        Ok(ModelSpec { semantics, extrapolation })
    }
}

/// A parsed `-c` cover relation name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoverSpec {
    Inclusion,
    AluGlobal,
    AluLocal,
    AmGlobal,
    AmLocal,
}

impl FromStr for CoverSpec {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<CoverSpec, ConfigurationError> {
        match s {
            "inclusion" => Ok(CoverSpec::Inclusion),
            "alu_g" => Ok(CoverSpec::AluGlobal),
            "alu_l" => Ok(CoverSpec::AluLocal),
            "am_g" => Ok(CoverSpec::AmGlobal),
            "am_l" => Ok(CoverSpec::AmLocal),
            other => Err(ConfigurationError::UnknownCover(other.to_string())),
        }
    }
}

/// `-s` search order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchOrder {
    Bfs,
    Dfs,
}

impl FromStr for SearchOrder {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<SearchOrder, ConfigurationError> {
        match s {
            "bfs" => Ok(SearchOrder::Bfs),
            "dfs" => Ok(SearchOrder::Dfs),
            other => Err(ConfigurationError::UnknownSearchOrder(other.to_string())),
        }
    }
}

/// `-C` certificate style. `graph` is DOT, `symbolic` the raw line-oriented
/// listing; `concrete` requires the concrete-run replayer, which this build
/// does not ship.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Certificate {
    Graph,
    Symbolic,
    None,
}

impl FromStr for Certificate {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Certificate, ConfigurationError> {
        match s {
            "graph" => Ok(Certificate::Graph),
            "symbolic" => Ok(Certificate::Symbolic),
            "none" => Ok(Certificate::None),
            "concrete" => Err(ConfigurationError::UnsupportedCertificate(s.to_string())),
            other => Err(ConfigurationError::UnknownCertificate(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_strings_round_trip() {
        let m: ModelSpec = "zg:elapsed:extraLU+l".parse().unwrap();
        assert_eq!(m.semantics, Semantics::Elapsed);
        assert_eq!(m.extrapolation, ExtrapolationKind::LuPlusLocal);
        let m: ModelSpec = "zg:standard:NOextra".parse().unwrap();
        assert_eq!(m.semantics, Semantics::Standard);
        assert_eq!(m.extrapolation, ExtrapolationKind::None);
        let m: ModelSpec = "zg:standard:extraM+g".parse().unwrap();
        assert_eq!(m.extrapolation, ExtrapolationKind::MPlusGlobal);
    }

    #[test]
    fn bad_model_strings() {
        assert!("zg:elapsed".parse::<ModelSpec>().is_err());
        assert!("zg:sometimes:extraMg".parse::<ModelSpec>().is_err());
        assert!("fsm:elapsed:extraMg".parse::<ModelSpec>().is_err());
        assert!(matches!(
            "async_zg:elapsed:extraLU+l".parse::<ModelSpec>(),
            Err(ConfigurationError::UnsupportedFamily(_))
        ));
    }

    #[test]
    fn cover_and_search_names() {
        assert_eq!("alu_l".parse::<CoverSpec>().unwrap(), CoverSpec::AluLocal);
        assert!("alu".parse::<CoverSpec>().is_err());
        assert_eq!("bfs".parse::<SearchOrder>().unwrap(), SearchOrder::Bfs);
        assert!("random".parse::<SearchOrder>().is_err());
        assert!(matches!(
            "concrete".parse::<Certificate>(),
            Err(ConfigurationError::UnsupportedCertificate(_))
        ));
    }
}
