use crate::settings::{
    EngineSettings, EnrichmentSettings, InvocationSettings, TableSettings,
    error::SettingsError,
    validated::{
        EnrichmentConfig, InstructionsSource, InvocationConfig, TableConfig, ValidatedSettings,
    },
};
use model::schema::output::OutputSchema;
use std::{collections::HashSet, time::Duration};
use tracing::{info, warn};

/// Validates engine settings before anything runs.
///
/// All problems are collected and reported together.
#[derive(Debug, Default)]
pub struct SettingsValidator {
    errors: Vec<String>,
}

impl SettingsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, settings: &EngineSettings) -> Result<ValidatedSettings, SettingsError> {
        self.validate_job(&settings.job);
        let table = self.validate_table(&settings.table);
        self.validate_schema(&settings.schema, &settings.table);
        let enrichment = self.validate_enrichment(&settings.enrichment);
        let invocation = self.validate_invocation(&settings.invocation);

        if !self.errors.is_empty() {
            return Err(SettingsError::ValidationFailed(self.errors));
        }

        let (Some(table), Some(enrichment), Some(invocation)) = (table, enrichment, invocation)
        else {
            return Err(SettingsError::ValidationFailed(vec![
                "incomplete settings".into(),
            ]));
        };

        let validated = ValidatedSettings {
            job: settings.job.clone(),
            state_path: settings.state_path.clone(),
            table,
            schema: settings.schema.clone(),
            enrichment,
            invocation,
        };
        info!(
            job = %validated.job,
            input = %validated.table.input_sheet,
            output = %validated.table.output_sheet,
            fields = validated.schema.fields.len(),
            budget_secs = validated.invocation.time_budget.as_secs(),
            "Settings validation completed successfully"
        );
        Ok(validated)
    }

    fn validate_job(&mut self, job: &str) {
        if job.trim().is_empty() {
            self.errors.push("job must not be empty".into());
        } else if job.contains(':') {
            self.errors.push(format!("job '{job}' must not contain ':'"));
        }
    }

    fn validate_table(&mut self, table: &TableSettings) -> Option<TableConfig> {
        let before = self.errors.len();

        if table.input_sheet.trim().is_empty() {
            self.errors.push("table.input_sheet must not be empty".into());
        }
        if table.output_sheet.trim().is_empty() {
            self.errors.push("table.output_sheet must not be empty".into());
        }
        if table.header_rows == 0 {
            self.errors
                .push("table.header_rows must be at least 1 (the field-name row)".into());
        }
        if table.identifier_column.trim().is_empty() {
            self.errors
                .push("table.identifier_column must not be empty".into());
        }
        if let Some(fallback) = &table.fallback_column {
            if fallback.trim().is_empty() {
                self.errors
                    .push("table.fallback_column must not be empty when set".into());
            } else if fallback.trim().eq_ignore_ascii_case(table.identifier_column.trim()) {
                self.errors.push(
                    "table.fallback_column must differ from table.identifier_column".into(),
                );
            }
        }
        if !table.delimiter.is_ascii() {
            self.errors
                .push(format!("table.delimiter '{}' must be ASCII", table.delimiter));
        }
        if table.input_sheet == table.output_sheet {
            warn!(
                sheet = %table.input_sheet,
                "Input and output sheets are the same; results are written next to the input"
            );
        }

        (self.errors.len() == before).then(|| TableConfig {
            data_dir: table.data_dir.clone(),
            delimiter: table.delimiter as u8,
            input_sheet: table.input_sheet.trim().to_string(),
            output_sheet: table.output_sheet.trim().to_string(),
            header_rows: table.header_rows,
            identifier_column: table.identifier_column.trim().to_string(),
            fallback_column: table.fallback_column.as_ref().map(|c| c.trim().to_string()),
            placement: table.placement,
            skip_when_output_present: table.skip_when_output_present,
        })
    }

    fn validate_schema(&mut self, schema: &OutputSchema, table: &TableSettings) {
        if schema.fields.is_empty() {
            self.errors
                .push("schema.fields must list at least one output field".into());
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &schema.fields {
            if field.name.trim().is_empty() {
                self.errors.push("schema field names must not be empty".into());
                continue;
            }
            if !names.insert(field.name.as_str()) {
                self.errors
                    .push(format!("schema field '{}' is listed twice", field.name));
            }
            let column = field.column().trim().to_lowercase();
            if !columns.insert(column.clone()) {
                self.errors.push(format!(
                    "schema column '{}' is targeted by more than one field",
                    field.column()
                ));
            }
            let protected = [Some(&table.identifier_column), table.fallback_column.as_ref()];
            if protected
                .into_iter()
                .flatten()
                .any(|c| c.trim().to_lowercase() == column)
            {
                self.errors.push(format!(
                    "schema field '{}' would overwrite key column '{}'",
                    field.name,
                    field.column()
                ));
            }
        }
    }

    fn validate_enrichment(&mut self, enrichment: &EnrichmentSettings) -> Option<EnrichmentConfig> {
        let before = self.errors.len();

        if !enrichment.endpoint.starts_with("http://") && !enrichment.endpoint.starts_with("https://")
        {
            self.errors.push(format!(
                "enrichment.endpoint '{}' must be an http(s) URL",
                enrichment.endpoint
            ));
        }
        if enrichment.model.trim().is_empty() {
            self.errors.push("enrichment.model must not be empty".into());
        }
        if enrichment.api_key_env.trim().is_empty() {
            self.errors
                .push("enrichment.api_key_env must not be empty".into());
        }
        if enrichment.timeout_secs == 0 {
            self.errors
                .push("enrichment.timeout_secs must be greater than 0".into());
        }
        if enrichment.max_attempts == 0 {
            self.errors
                .push("enrichment.max_attempts must be at least 1".into());
        }
        if enrichment.retry_base_delay_ms > enrichment.retry_max_delay_ms {
            self.errors.push(
                "enrichment.retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            );
        }

        let instructions = match (&enrichment.instructions, &enrichment.instructions_path) {
            (Some(_), Some(_)) => {
                self.errors.push(
                    "set either enrichment.instructions or enrichment.instructions_path, not both"
                        .into(),
                );
                None
            }
            (Some(text), None) if !text.trim().is_empty() => {
                Some(InstructionsSource::Inline(text.clone()))
            }
            (None, Some(path)) => Some(InstructionsSource::File(path.clone())),
            _ => {
                self.errors.push(
                    "enrichment.instructions or enrichment.instructions_path is required".into(),
                );
                None
            }
        };

        if self.errors.len() != before {
            return None;
        }
        instructions.map(|instructions| EnrichmentConfig {
            endpoint: enrichment.endpoint.clone(),
            model: enrichment.model.clone(),
            api_key_env: enrichment.api_key_env.clone(),
            instructions,
            prompt_cache: enrichment.prompt_cache,
            timeout: Duration::from_secs(enrichment.timeout_secs),
            max_attempts: enrichment.max_attempts,
            retry_base_delay: Duration::from_millis(enrichment.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(enrichment.retry_max_delay_ms),
        })
    }

    fn validate_invocation(&mut self, invocation: &InvocationSettings) -> Option<InvocationConfig> {
        let before = self.errors.len();
        let budget = invocation.time_budget_secs;

        if budget == 0 {
            self.errors
                .push("invocation.time_budget_secs must be greater than 0".into());
        }
        if invocation.max_rows == Some(0) {
            self.errors
                .push("invocation.max_rows must be at least 1 when set".into());
        }
        if invocation.row_estimate_secs >= budget && budget > 0 {
            self.errors.push(format!(
                "invocation.row_estimate_secs ({}) must be below the time budget ({budget})",
                invocation.row_estimate_secs
            ));
        }

        let lock_stale_after = invocation
            .lock_stale_after_secs
            .unwrap_or(budget.saturating_mul(2));
        if lock_stale_after < budget.saturating_mul(2) {
            self.errors.push(format!(
                "invocation.lock_stale_after_secs ({lock_stale_after}) must be at least twice the time budget ({budget})"
            ));
        }
        if invocation.cursor_stale_after_secs <= budget {
            self.errors.push(
                "invocation.cursor_stale_after_secs must exceed the time budget".into(),
            );
        }
        if invocation.continuation_interval_secs == 0 {
            warn!("invocation.continuation_interval_secs is 0; continuations run back to back");
        }
        if invocation.backoff_base_secs == 0 {
            self.errors
                .push("invocation.backoff_base_secs must be greater than 0".into());
        }
        if invocation.backoff_base_secs > invocation.backoff_max_secs {
            self.errors
                .push("invocation.backoff_base_secs must not exceed backoff_max_secs".into());
        }

        (self.errors.len() == before).then(|| InvocationConfig {
            time_budget: Duration::from_secs(budget),
            max_rows: invocation.max_rows,
            row_estimate: Duration::from_secs(invocation.row_estimate_secs),
            lock_stale_after: Duration::from_secs(lock_stale_after),
            cursor_stale_after: Duration::from_secs(invocation.cursor_stale_after_secs),
            continuation_interval: Duration::from_secs(invocation.continuation_interval_secs),
            backoff_base: Duration::from_secs(invocation.backoff_base_secs),
            backoff_max: Duration::from_secs(invocation.backoff_max_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Placement;

    fn settings() -> EngineSettings {
        EngineSettings::from_json(
            r#"{
                "job": "triage",
                "table": {
                    "identifier_column": "case_id",
                    "fallback_column": "title",
                    "placement": "match_by_key"
                },
                "schema": { "fields": [ { "name": "category" }, { "name": "notes", "required": false } ] },
                "enrichment": { "instructions": "Classify the case." },
                "invocation": { "time_budget_secs": 120 }
            }"#,
        )
        .unwrap()
    }

    fn errors_of(settings: &EngineSettings) -> Vec<String> {
        match SettingsValidator::new().validate(settings) {
            Err(SettingsError::ValidationFailed(errors)) => errors,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_settings() {
        let validated = SettingsValidator::new().validate(&settings()).unwrap();
        assert_eq!(validated.first_data_row(), 3);
        assert_eq!(validated.table.placement, Placement::MatchByKey);
        assert_eq!(validated.invocation.lock_stale_after, Duration::from_secs(240));
        assert_eq!(
            validated.enrichment.instructions,
            InstructionsSource::Inline("Classify the case.".into())
        );
    }

    #[test]
    fn lock_timeout_must_cover_two_budgets() {
        let mut s = settings();
        s.invocation.lock_stale_after_secs = Some(200);
        let errors = errors_of(&s);
        assert!(errors.iter().any(|e| e.contains("lock_stale_after_secs")));
    }

    #[test]
    fn schema_may_not_overwrite_identifier() {
        let mut s = settings();
        s.schema.fields.push(model::schema::output::OutputField::new("Case_ID", true));
        let errors = errors_of(&s);
        assert!(errors.iter().any(|e| e.contains("overwrite key column")));
    }

    #[test]
    fn collects_every_problem() {
        let mut s = settings();
        s.job = String::new();
        s.table.header_rows = 0;
        s.enrichment.instructions = None;
        s.enrichment.max_attempts = 0;
        assert_eq!(errors_of(&s).len(), 4);
    }

    #[test]
    fn fallback_must_differ() {
        let mut s = settings();
        s.table.fallback_column = Some("CASE_ID".into());
        assert!(
            errors_of(&s)
                .iter()
                .any(|e| e.contains("fallback_column must differ"))
        );
    }
}
