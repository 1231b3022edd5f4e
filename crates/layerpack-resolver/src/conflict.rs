use std::collections::BTreeMap;

use layerpack_domain::{PackagingError, RequirementSpec};

/// Reject direct requirements that can never be satisfied together.
///
/// Two specs for the same distribution conflict when one is an exact pin the
/// other's specifiers exclude, or when both are direct references to
/// different URLs.
pub fn check_direct_conflicts(requirements: &[RequirementSpec]) -> Result<(), PackagingError> {
    let mut by_name: BTreeMap<&str, Vec<&RequirementSpec>> = BTreeMap::new();
    for spec in requirements {
        by_name.entry(spec.normalized.as_str()).or_default().push(spec);
    }

    for specs in by_name.values() {
        for (idx, first) in specs.iter().enumerate() {
            for second in &specs[idx + 1..] {
                if conflicts(first, second) {
                    tracing::debug!(first = %first, second = %second, "direct requirements conflict");
                    return Err(PackagingError::DependencyConflict {
                        requirements: vec![first.raw.clone(), second.raw.clone()],
                        detail: Some(format!(
                            "`{}` from {} cannot be satisfied together with `{}` from {}",
                            first.raw, first.origin, second.raw, second.origin
                        )),
                    });
                }
            }
        }
    }
    Ok(())
}

fn conflicts(first: &RequirementSpec, second: &RequirementSpec) -> bool {
    if let (Some(left), Some(right)) = (&first.url, &second.url) {
        return left != right;
    }
    let excludes = |pinned: &RequirementSpec, other: &RequirementSpec| {
        pinned
            .pinned_version()
            .is_some_and(|version| !other.allows(&version))
    };
    excludes(first, second) || excludes(second, first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerpack_domain::{parse_package_list, parse_requirement, RequirementOrigin};
    use std::path::PathBuf;

    fn specs(items: &[&str]) -> Vec<RequirementSpec> {
        let owned: Vec<String> = items.iter().map(|s| (*s).to_string()).collect();
        parse_package_list(&owned).unwrap()
    }

    #[test]
    fn different_pins_conflict() {
        let err = check_direct_conflicts(&specs(&["six==1.15.0", "requests", "six==1.16.0"]))
            .unwrap_err();
        assert_eq!(err.kind(), "DependencyConflictError");
        match err {
            PackagingError::DependencyConflict { requirements, .. } => {
                assert_eq!(requirements, vec!["six==1.15.0", "six==1.16.0"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pin_outside_range_conflicts() {
        assert!(check_direct_conflicts(&specs(&["urllib3<2", "urllib3==2.0.7"])).is_err());
    }

    #[test]
    fn compatible_constraints_pass() {
        assert!(check_direct_conflicts(&specs(&["urllib3>=1.26", "urllib3==1.26.18"])).is_ok());
        assert!(check_direct_conflicts(&specs(&["Six==1.16", "six==1.16.0"])).is_ok());
        assert!(check_direct_conflicts(&specs(&["boto3", "botocore"])).is_ok());
    }

    #[test]
    fn detail_names_origins() {
        let file = parse_requirement(
            "six==1.15.0",
            RequirementOrigin::File {
                path: PathBuf::from("requirements.txt"),
                line: 4,
            },
        )
        .unwrap();
        let cli = parse_requirement("six==1.16.0", RequirementOrigin::Cli).unwrap();
        let err = check_direct_conflicts(&[file, cli]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("requirements.txt:4"), "{message}");
        assert!(message.contains("command line"), "{message}");
    }
}
