use tabled::Tabled;

#[derive(Tabled)]
pub struct CheckRow {
    pub scenario: String,
    pub group: String,
    pub check: String,
    pub passed: u64,
    pub failed: u64,
    #[tabled(rename = "last failure", display = "or_dash")]
    pub last_failure: Option<String>,
}

fn or_dash(s: &Option<String>) -> String {
    s.clone().unwrap_or_else(|| "-".to_string())
}
