/// Key layout of one job's state. Everything lives under `job:{name}:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKeys {
    job: String,
}

impl StateKeys {
    pub fn new(job: &str) -> Self {
        StateKeys {
            job: job.to_string(),
        }
    }

    pub fn cursor(&self) -> String {
        format!("job:{}:cursor", self.job)
    }

    pub fn lock(&self) -> String {
        format!("job:{}:in_progress", self.job)
    }

    pub fn control(&self) -> String {
        format!("job:{}:control", self.job)
    }

    pub fn summary(&self) -> String {
        format!("job:{}:summary", self.job)
    }

    /// Prefix of the ledger for one (input, output) sheet pair.
    pub fn ledger_scope(&self, input_sheet: &str, output_sheet: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(input_sheet.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(output_sheet.as_bytes());
        let scope = hasher.finalize().to_hex();
        format!("job:{}:ledger:{}:", self.job, &scope[..16])
    }

    /// Prefix of every ledger entry of one row. Row keys are hashed so that no
    /// identifier can collide with the key separator.
    pub fn ledger_row(scope: &str, row_key: &str) -> String {
        let row = blake3::hash(row_key.as_bytes()).to_hex();
        format!("{scope}{}:", &row[..32])
    }

    pub fn ledger_entry(row_prefix: &str, seq: u64) -> String {
        format!("{row_prefix}{seq:020}")
    }
}
