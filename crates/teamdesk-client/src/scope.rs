use uuid::Uuid;

/// The filter key that bounds a fetch or a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// No filter.
    All,
    /// Rows belonging to one team.
    Team(Uuid),
    /// Rows belonging to one project.
    Project(Uuid),
    /// Rows outside every project (`project_id IS NULL`).
    Global,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Team(id) => write!(f, "team:{id}"),
            Scope::Project(id) => write!(f, "project:{id}"),
            Scope::Global => f.write_str("global"),
        }
    }
}
