use clap::{Args, Subcommand};
use model::{batch::mode::BatchMode, error::ModelError};

#[derive(Subcommand)]
pub enum Commands {
    /// Seed a new batch over the selected input rows
    Start {
        #[command(flatten)]
        rows: RowSelection,

        #[arg(long, help = "Keep running invocations until the batch settles")]
        watch: bool,
    },
    /// Run a single time-boxed invocation of the active batch
    Continue,
    /// Run invocations until the batch completes, is paused or is cancelled
    Watch,
    Pause,
    Resume,
    Cancel,
    Status {
        #[arg(long, help = "Print the status as JSON instead of a table")]
        json: bool,
    },
    /// List rows whose latest outcome is a failure
    Failures {
        #[arg(long, help = "Print the failures as JSON instead of a table")]
        json: bool,
    },
    /// Start a new batch over exactly the failed rows
    RetryFailed {
        #[arg(long, help = "Keep running invocations until the batch settles")]
        watch: bool,
    },
    /// Drop the invocation lock left behind by a crashed process
    Unlock,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RowSelection {
    #[arg(long, help = "Every data row of the input sheet")]
    pub all: bool,

    #[arg(long, value_name = "N", help = "The first N data rows")]
    pub first: Option<usize>,

    #[arg(
        long,
        value_name = "SPEC",
        help = "Explicit rows, e.g. \"20-30,45\" (1-based sheet rows)"
    )]
    pub rows: Option<String>,
}

impl RowSelection {
    pub fn to_mode(&self) -> Result<BatchMode, ModelError> {
        if let Some(spec) = &self.rows {
            return BatchMode::from_row_spec(spec);
        }
        if let Some(n) = self.first {
            return Ok(BatchMode::FirstN(n));
        }
        Ok(BatchMode::AllRows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_to_mode() {
        let rows = RowSelection {
            all: false,
            first: None,
            rows: Some("7, 3-4".into()),
        };
        assert_eq!(rows.to_mode().unwrap(), BatchMode::ExplicitList(vec![3, 4, 7]));

        let first = RowSelection {
            all: false,
            first: Some(5),
            rows: None,
        };
        assert_eq!(first.to_mode().unwrap(), BatchMode::FirstN(5));

        let bad = RowSelection {
            all: false,
            first: None,
            rows: Some("x".into()),
        };
        assert!(bad.to_mode().is_err());
    }
}
