/// Connection parameters shared by a pool and all of its connections.
///
/// ```rs
/// let mut info = ConnectionInfo::default();
/// info.user = "app".to_string();
/// info.password = "secret".to_string();
/// info.database = "orders".to_string();
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Username for authentication (can be empty for anonymous connections)
    pub user: String,

    /// Hostname or IP address
    pub host: String,

    /// Port number for the MySQL server
    pub port: u16,

    pub password: String,

    /// Database name to select on connect; empty selects none
    pub database: String,

    /// Character set applied right after connect; empty skips that phase
    pub character_set: String,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            user: String::new(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            password: String::new(),
            database: String::new(),
            character_set: String::new(),
        }
    }
}
