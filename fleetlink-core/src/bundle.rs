//! Work bundle types: executables and their externally-sourced parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to a credential held by an external vault.
///
/// A work order carries these in place of the literal parameter value; the
/// credential gatherer resolves them before execution may proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalParameterLocation {
    /// Token authorizing access to the vault namespace.
    pub access_token: String,
    /// Vault namespace the credential lives in.
    pub namespace: String,
    /// Identifier of the credential within the namespace.
    pub credential_id: String,
}

/// A credential value resolved from an external vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialValue {
    /// The secret itself.
    pub value: String,
    /// How `value` is encoded, if the vault wrapped it in an envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_mime_type: Option<String>,
}

impl CredentialValue {
    /// Returns true if this agent version can consume the value.
    ///
    /// Only bare values (no envelope mime type) are consumable; anything
    /// else is a version-compatibility problem no retry can fix.
    pub fn is_consumable(&self) -> bool {
        self.envelope_mime_type.is_none()
    }
}

/// A single executable entry in a work bundle.
///
/// Recipes keep their inputs in `attributes`, scripts in `parameters`;
/// each variant carries its own map of unresolved external references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Executable {
    /// A recipe with a free-form attribute tree.
    Recipe {
        /// Display name of the recipe.
        name: String,
        /// Literal attribute values, keyed by attribute name.
        attributes: BTreeMap<String, serde_json::Value>,
        /// Attributes whose values must be fetched from an external vault.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        external_attributes: BTreeMap<String, ExternalParameterLocation>,
    },
    /// A script with named parameters.
    Script {
        /// Display name of the script.
        name: String,
        /// Literal parameter values, keyed by parameter name.
        parameters: BTreeMap<String, serde_json::Value>,
        /// Parameters whose values must be fetched from an external vault.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        external_parameters: BTreeMap<String, ExternalParameterLocation>,
    },
}

impl Executable {
    /// Display name of this executable.
    pub fn name(&self) -> &str {
        match self {
            Self::Recipe { name, .. } | Self::Script { name, .. } => name,
        }
    }

    /// The variant-specific map of external references.
    pub fn external_refs(&self) -> &BTreeMap<String, ExternalParameterLocation> {
        match self {
            Self::Recipe {
                external_attributes, ..
            } => external_attributes,
            Self::Script {
                external_parameters,
                ..
            } => external_parameters,
        }
    }

    /// Write a resolved value into the variant-specific live map.
    pub fn set_param(&mut self, name: &str, value: serde_json::Value) {
        match self {
            Self::Recipe { attributes, .. } => {
                attributes.insert(name.to_string(), value);
            }
            Self::Script { parameters, .. } => {
                parameters.insert(name.to_string(), value);
            }
        }
    }

    /// Read a literal parameter/attribute value, if present.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        match self {
            Self::Recipe { attributes, .. } => attributes.get(name),
            Self::Script { parameters, .. } => parameters.get(name),
        }
    }
}

/// An ordered unit of work fetched from the fleet service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBundle {
    /// Executables in execution order.
    pub executables: Vec<Executable>,
}

impl WorkBundle {
    /// Total number of unresolved external references across the bundle.
    pub fn external_ref_count(&self) -> usize {
        self.executables
            .iter()
            .map(|exe| exe.external_refs().len())
            .sum()
    }
}
