//! Capability Catalog
//!
//! Snapshot of the tools, prompts and resources a tool server exposes.
//! Each listing is fetched on its own; a listing the server cannot provide
//! degrades to an empty list and is recorded in [`Catalog::unavailable`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::session::ToolSession;
use crate::tool::ToolDescriptor;

/// Argument accepted by a prompt template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Prompt template advertised by the tool server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptDescriptor {
    /// Names of required arguments missing from `provided`
    pub fn missing_arguments<'a>(
        &'a self,
        provided: &std::collections::HashMap<String, String>,
    ) -> Vec<&'a str> {
        self.arguments
            .iter()
            .filter(|a| a.required && !provided.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect()
    }
}

/// Resource advertised by the tool server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Listing categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tools,
    Prompts,
    Resources,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Tools => write!(f, "tools"),
            Category::Prompts => write!(f, "prompts"),
            Category::Resources => write!(f, "resources"),
        }
    }
}

/// Tool names enabled for one turn
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSelection {
    /// Every tool in the catalog
    All,
    /// No tools
    #[default]
    None,
    /// Only the listed names
    Named(HashSet<String>),
}

impl ToolSelection {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, name: &str) -> bool {
        match self {
            ToolSelection::All => true,
            ToolSelection::None => false,
            ToolSelection::Named(names) => names.contains(name),
        }
    }
}

/// Capabilities of one tool server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub tools: Vec<ToolDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub resources: Vec<ResourceDescriptor>,

    /// Categories the server could not list
    #[serde(default)]
    pub unavailable: Vec<Category>,
}

impl Catalog {
    /// Fetch all three listings; never fails as a whole
    pub async fn fetch(session: &dyn ToolSession) -> Self {
        let mut catalog = Catalog::default();

        match session.list_tools().await {
            Ok(tools) => catalog.tools = dedup_tools(tools),
            Err(e) => catalog.degrade(Category::Tools, &e),
        }
        match session.list_prompts().await {
            Ok(prompts) => catalog.prompts = prompts,
            Err(e) => catalog.degrade(Category::Prompts, &e),
        }
        match session.list_resources().await {
            Ok(resources) => catalog.resources = resources,
            Err(e) => catalog.degrade(Category::Resources, &e),
        }

        debug!(
            tools = catalog.tools.len(),
            prompts = catalog.prompts.len(),
            resources = catalog.resources.len(),
            unavailable = ?catalog.unavailable,
            "Fetched capability catalog"
        );
        catalog
    }

    fn degrade(&mut self, category: Category, cause: &AgentError) {
        let error = AgentError::CatalogFetch {
            category: category.to_string(),
            message: cause.to_string(),
        };
        warn!(%category, "{}", error);
        self.unavailable.push(category);
    }

    /// Prompt descriptor by name
    pub fn prompt(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts.iter().find(|p| p.name == name)
    }

    /// Resource descriptor by URI
    pub fn resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.uri == uri)
    }

    /// Tools allowed by `selection`, in catalog order
    pub fn enabled_tools(&self, selection: &ToolSelection) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| selection.allows(&t.name))
            .cloned()
            .collect()
    }

    /// Tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Tool names are unique within a session; keep the first occurrence
fn dedup_tools(tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    tools
        .into_iter()
        .filter(|t| {
            let fresh = seen.insert(t.name.clone());
            if !fresh {
                warn!(tool = %t.name, "Dropping duplicate tool descriptor");
            }
            fresh
        })
        .collect()
}
