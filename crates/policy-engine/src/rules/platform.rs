//! Built-in rules for well-known platform names.
//!
//! These cover the `SUPPORTED_*` references shipped with the stock Windows
//! ADMX set, so catalogs do not have to define them.

use gpfleet_core::model::{OsProduct, PolicyEvaluationContext};

use crate::catalog::catalog_key;
use crate::decision::ApplicabilityDecision;

struct PlatformFloor {
    name: &'static str,
    major: u32,
    minor: u32,
    min_build: Option<u32>,
    product: Option<OsProduct>,
}

const PLATFORMS: &[PlatformFloor] = &[
    PlatformFloor { name: "supported_windows2000", major: 5, minor: 0, min_build: None, product: None },
    PlatformFloor { name: "supported_windowsxp", major: 5, minor: 1, min_build: None, product: None },
    PlatformFloor { name: "supported_windowsnet", major: 5, minor: 2, min_build: None, product: Some(OsProduct::Server) },
    PlatformFloor { name: "supported_windowsvista", major: 6, minor: 0, min_build: None, product: None },
    PlatformFloor { name: "supported_windows7", major: 6, minor: 1, min_build: None, product: None },
    PlatformFloor { name: "supported_windows8", major: 6, minor: 2, min_build: None, product: None },
    PlatformFloor { name: "supported_windows_10_0", major: 10, minor: 0, min_build: None, product: None },
    PlatformFloor { name: "supported_windows_11_0", major: 10, minor: 0, min_build: Some(22000), product: Some(OsProduct::Workstation) },
    PlatformFloor { name: "supported_windowsserver2016", major: 10, minor: 0, min_build: Some(14393), product: Some(OsProduct::Server) },
];

/// `None` when `name` is not a built-in platform.
pub fn evaluate(name: &str, context: &PolicyEvaluationContext) -> Option<ApplicabilityDecision> {
    let key = catalog_key(name);
    let floor = PLATFORMS.iter().find(|platform| platform.name == key)?;
    Some(check_floor(floor, name, context))
}

pub fn is_builtin(name: &str) -> bool {
    let key = catalog_key(name);
    PLATFORMS.iter().any(|platform| platform.name == key)
}

fn check_floor(floor: &PlatformFloor, name: &str, context: &PolicyEvaluationContext) -> ApplicabilityDecision {
    let version = context.os_version;
    if !version.at_least(floor.major, floor.minor) {
        return ApplicabilityDecision::not_applicable(format!(
            "{name} requires {}.{} or later, host is {version}",
            floor.major, floor.minor
        ));
    }

    if let Some(required) = floor.product {
        match context.os_product {
            Some(product) if product != required => {
                return ApplicabilityDecision::not_applicable(format!(
                    "{name} requires a {required:?} product"
                ));
            }
            Some(_) => {}
            None => {
                return ApplicabilityDecision::unknown(format!("{name}: host product is unknown"));
            }
        }
    }

    if let Some(min_build) = floor.min_build {
        if (version.major, version.minor) == (floor.major, floor.minor) {
            match version.build {
                Some(build) if build < min_build => {
                    return ApplicabilityDecision::not_applicable(format!(
                        "{name} requires build {min_build}, host is {build}"
                    ));
                }
                Some(_) => {}
                None => {
                    return ApplicabilityDecision::unknown(format!("{name}: host build is unknown"));
                }
            }
        }
    }

    ApplicabilityDecision::applicable(format!("{name} satisfied by {version}"))
}
