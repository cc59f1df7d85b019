//! Property name translation between server payloads and client metadata.

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};

/// How property names on the wire relate to property names in metadata.
///
/// Applied at the payload boundary: merge translates incoming keys to client
/// names before lookup, and save bundles are written with server names.
/// Names starting with `$` are protocol markers and pass through untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamingConvention {
    /// Wire names match client names exactly.
    #[default]
    Identity,
    /// Wire names are camelCase, client names are PascalCase.
    CamelCase,
}

impl NamingConvention {
    /// Translates a wire property name to its client form.
    #[must_use]
    pub fn to_client(self, server_name: &str) -> String {
        match self {
            Self::Identity => server_name.to_string(),
            Self::CamelCase if server_name.starts_with('$') => server_name.to_string(),
            Self::CamelCase => server_name.to_case(Case::Pascal),
        }
    }

    /// Translates a client property name to its wire form.
    #[must_use]
    pub fn to_server(self, client_name: &str) -> String {
        match self {
            Self::Identity => client_name.to_string(),
            Self::CamelCase if client_name.starts_with('$') => client_name.to_string(),
            Self::CamelCase => client_name.to_case(Case::Camel),
        }
    }
}
