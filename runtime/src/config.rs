use strata::Syntax;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub syntax: Syntax,
    /// Run parameter keys handed on to embedded and base templates.
    pub forwarded_params: Vec<String>,
    /// Server path given to top-level renders that have none, used by `linkLocal`.
    pub server_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            syntax: Syntax::default(),
            forwarded_params: ["req", "res", "next"].map(String::from).to_vec(),
            server_path: None,
        }
    }
}
