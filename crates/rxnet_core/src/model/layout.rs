//! Persisted layout vocabulary: enum spellings, collection names, version.
//!
//! # Invariants
//! - Enum values persist as the lowercase strings listed here; renaming a
//!   spelling is a layout change and requires a version bump.
//! - `LAYOUT_VERSION` is the version this binary writes into `_db_meta_data`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const STRUCTURES: &str = "structures";
pub const CALCULATIONS: &str = "calculations";
pub const PROPERTIES: &str = "properties";
pub const COMPOUNDS: &str = "compounds";
pub const FLASKS: &str = "flasks";
pub const REACTIONS: &str = "reactions";
pub const ELEMENTARY_STEPS: &str = "elementary_steps";
pub const META_DATA: &str = "_db_meta_data";

/// Collections created by `Manager::init`, besides the metadata one.
pub const DEFAULT_COLLECTIONS: [&str; 7] = [
    STRUCTURES,
    CALCULATIONS,
    PROPERTIES,
    COMPOUNDS,
    FLASKS,
    REACTIONS,
    ELEMENTARY_STEPS,
];

/// Persisted-layout version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Layouts are compatible when major and minor agree.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub const LAYOUT_VERSION: Version = Version::new(1, 3, 0);

/// Error returned when a persisted enum spelling is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub enum_name: &'static str,
    pub value: String,
}

impl Display for UnknownVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} value `{}`", self.enum_name, self.value)
    }
}

impl Error for UnknownVariant {}

macro_rules! persisted_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        enum_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl From<$name> for serde_json::Value {
            fn from(value: $name) -> Self {
                serde_json::Value::String(value.as_str().to_string())
            }
        }
    };
}

persisted_enum! {
    /// Entity kind, persisted as `_objecttype`.
    EntityKind {
        Structure => "structure",
        Property => "property",
        Calculation => "calculation",
        Compound => "compound",
        Flask => "flask",
        Reaction => "reaction",
        ElementaryStep => "elementary_step",
    }
}

impl EntityKind {
    /// Collection a kind lives in when the default layout is used.
    pub fn default_collection(self) -> &'static str {
        match self {
            Self::Structure => STRUCTURES,
            Self::Property => PROPERTIES,
            Self::Calculation => CALCULATIONS,
            Self::Compound => COMPOUNDS,
            Self::Flask => FLASKS,
            Self::Reaction => REACTIONS,
            Self::ElementaryStep => ELEMENTARY_STEPS,
        }
    }
}

persisted_enum! {
    /// Role of a structure in the exploration.
    StructureLabel {
        None => "none",
        UserGuess => "user_guess",
        UserOptimized => "user_optimized",
        MinimumGuess => "minimum_guess",
        MinimumOptimized => "minimum_optimized",
        TsGuess => "ts_guess",
        TsOptimized => "ts_optimized",
        ElementaryStepGuess => "elementary_step_guess",
        ElementaryStepOptimized => "elementary_step_optimized",
        ReactiveComplexGuess => "reactive_complex_guess",
        ReactiveComplexScanned => "reactive_complex_scanned",
        ReactiveComplexOptimized => "reactive_complex_optimized",
        SurfaceGuess => "surface_guess",
        SurfaceOptimized => "surface_optimized",
        SurfaceAdsorptionGuess => "surface_adsorption_guess",
        ComplexGuess => "complex_guess",
        ComplexOptimized => "complex_optimized",
        SurfaceComplexOptimized => "surface_complex_optimized",
        UserSurfaceOptimized => "user_surface_optimized",
        UserComplexOptimized => "user_complex_optimized",
        UserSurfaceComplexOptimized => "user_surface_complex_optimized",
        Irrelevant => "irrelevant",
        Duplicate => "duplicate",
        GeometryOptimizationObserver => "geometry_optimization_observer",
        TsOptimizationObserver => "ts_optimization_observer",
        IrcForwardObserver => "irc_forward_observer",
        IrcBackwardObserver => "irc_backward_observer",
        IrcOptForwardObserver => "irc_opt_forward_observer",
        IrcOptBackwardObserver => "irc_opt_backward_observer",
        ScanObserver => "scan_observer",
    }
}

persisted_enum! {
    /// Lifecycle status of a calculation.
    CalculationStatus {
        Construction => "construction",
        New => "new",
        Pending => "pending",
        Running => "running",
        Complete => "complete",
        Analyzed => "analyzed",
        Hold => "hold",
        Failed => "failed",
    }
}

persisted_enum! {
    ElementaryStepType {
        Regular => "regular",
        Barrierless => "barrierless",
        ModelTransformation => "model_transformation",
    }
}

persisted_enum! {
    /// Aggregate kind of a reaction reactant.
    ReactantType {
        Compound => "compound",
        Flask => "flask",
    }
}

/// Reactant side selector. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    None,
    Lhs,
    Rhs,
    Both,
}

impl Side {
    pub fn includes_lhs(self) -> bool {
        matches!(self, Self::Lhs | Self::Both)
    }

    pub fn includes_rhs(self) -> bool {
        matches!(self, Self::Rhs | Self::Both)
    }

    pub(crate) fn from_membership(lhs: bool, rhs: bool) -> Self {
        match (lhs, rhs) {
            (true, true) => Self::Both,
            (true, false) => Self::Lhs,
            (false, true) => Self::Rhs,
            (false, false) => Self::None,
        }
    }
}

/// Atom index maps stored on an elementary step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdxMapType {
    LhsRhs,
    RhsLhs,
    LhsTs,
    TsLhs,
    TsRhs,
    RhsTs,
}

#[cfg(test)]
mod tests {
    use super::{CalculationStatus, EntityKind, StructureLabel, Version, LAYOUT_VERSION};

    #[test]
    fn enum_spellings_round_trip() {
        for label in StructureLabel::ALL {
            assert_eq!(label.as_str().parse::<StructureLabel>().unwrap(), *label);
        }
        for status in CalculationStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn unknown_spelling_is_rejected() {
        let err = "TS_GUESS".parse::<StructureLabel>().unwrap_err();
        assert_eq!(err.enum_name, "StructureLabel");
        assert!(serde_json::from_str::<CalculationStatus>("\"done\"").is_err());
    }

    #[test]
    fn kinds_map_to_plural_collections() {
        assert_eq!(EntityKind::ElementaryStep.default_collection(), "elementary_steps");
        assert_eq!(EntityKind::ElementaryStep.as_str(), "elementary_step");
    }

    #[test]
    fn version_compatibility_ignores_patch() {
        assert!(LAYOUT_VERSION.is_compatible_with(&Version::new(1, 3, 7)));
        assert!(!LAYOUT_VERSION.is_compatible_with(&Version::new(1, 2, 0)));
        assert_eq!(LAYOUT_VERSION.to_string(), "1.3.0");
    }
}
