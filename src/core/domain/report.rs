//! Audit report records.
//!
//! Serialized as the `affected-sensitive-parameters.yaml` artifact.

use serde::{Deserialize, Serialize};

use super::{Context, Field};

/// The parameter a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetParameter {
    pub environment: String,
    pub namespace: String,
    pub application: String,
    pub context: Context,
    pub parameter_key: String,
    pub cred_field: Field,
}

/// Another parameter in the tree referencing the rotated credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedParameter {
    pub environment: String,
    pub namespace: String,
    pub application: String,
    pub context: Context,
    pub parameter_key: String,
    pub cred_id: String,
    pub environment_cred_filepath: Vec<String>,
    pub shared_cred_filepath: Vec<String>,
}

/// One request's target plus everything else it affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationResult {
    pub target_parameter: TargetParameter,
    pub affected_parameters: Vec<AffectedParameter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_with_stable_keys() {
        let result = RotationResult {
            target_parameter: TargetParameter {
                environment: "env-1".to_string(),
                namespace: "ns1".to_string(),
                application: String::new(),
                context: Context::Deployment,
                parameter_key: "DB_PASSWORD".to_string(),
                cred_field: Field::Password,
            },
            affected_parameters: vec![AffectedParameter {
                environment: "env-2".to_string(),
                namespace: "ns2".to_string(),
                application: "billing".to_string(),
                context: Context::Runtime,
                parameter_key: "config.db[0].password".to_string(),
                cred_id: "db-cred".to_string(),
                environment_cred_filepath: vec![
                    "environments/cluster-1/env-2/Credentials/credentials.yml".to_string(),
                ],
                shared_cred_filepath: vec![],
            }],
        };

        let yaml = serde_yaml::to_string(&vec![result.clone()]).unwrap();
        assert!(yaml.contains("target_parameter:"));
        assert!(yaml.contains("cred_field: password"));
        assert!(yaml.contains("context: runtime"));

        let back: Vec<RotationResult> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, vec![result]);
    }
}
