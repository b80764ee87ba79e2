#[cfg(test)]
mod tests {
    use crate::utils::{
        CATEGORY_COL, HEADER_ROWS, Harness, INPUT, OUTPUT, alt_key, budget, case_id, case_sheet,
        data_row, header_block, settings,
    };
    use chrono::Utc;
    use connectors::{enrich::EnrichResponse, error::EnrichError, table::memory::MemoryRowStore};
    use engine_config::settings::Placement;
    use engine_core::state::{keys::StateKeys, lock::InvocationLock};
    use engine_processing::error::StepError;
    use engine_runtime::{
        controller::ControlOutcome, error::EngineError, scheduler::ContinuationScheduler,
    };
    use model::{
        batch::{mode::BatchMode, state::BatchState},
        core::{identifiers::RowId, value::Value},
        events::BatchEvent,
        records::result::{FailureReason, RowStatus},
    };
    use std::{collections::BTreeSet, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    fn primary(n: usize) -> RowId {
        RowId::Primary(case_id(n))
    }

    // Scenario: 207 data rows, at most 5 rows per invocation.
    // Expected Outcome:
    // - 42 invocations, the last one completing the batch.
    // - Exactly one ledger entry and one enrichment call per data row.
    // - No header row is ever touched.
    #[traced_test]
    #[tokio::test]
    async fn large_sheet_completes_across_invocations() {
        let h = Harness::same_index(207, 5);
        let cursor = h.controller.start(BatchMode::AllRows).await.unwrap();
        assert_eq!(cursor.total_target, 207);
        assert_eq!(cursor.next_index, 3);

        let mut invocations = 0;
        loop {
            let report = h.invoke(5).await;
            invocations += 1;
            assert!(report.processed <= 5);
            if report.state == BatchState::Completed {
                break;
            }
            assert_eq!(report.state, BatchState::PausedForContinuation);
            assert!(invocations < 100, "batch never completed");
        }
        assert_eq!(invocations, 42);

        let entries = h.ledger().latest_per_row().await.unwrap();
        assert_eq!(entries.len(), 207);
        let rows: BTreeSet<usize> = entries.iter().map(|e| e.result.row_index).collect();
        assert_eq!(rows, (3..=209).collect::<BTreeSet<_>>());
        assert!(entries.iter().all(|e| e.result.status == RowStatus::Success));
        assert_eq!(h.ledger().entries().await.unwrap().len(), 207);
        assert_eq!(h.enricher.calls().len(), 207);

        assert_eq!(h.output_cell(3, CATEGORY_COL), Value::from("cat:Case title 1"));
        assert_eq!(h.output_cell(209, CATEGORY_COL), Value::from("cat:Case title 207"));
        assert_eq!(h.output_cell(2, CATEGORY_COL), Value::from("category"));

        let status = h.controller.status().await.unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.processed, 207);
        assert_eq!(status.succeeded, 207);
        assert_eq!(status.failed, 0);

        assert!(matches!(
            h.controller
                .run_invocation(budget(5), &CancellationToken::new())
                .await,
            Err(EngineError::NoActiveBatch)
        ));
    }

    // Scenario: output rows are in reverse order and keyed by identifier.
    // - Case 48 has no identifier in the output sheet, only its secondary key.
    // - Case 18 has no identifier in the input sheet.
    // - Case 60 does not appear in the output sheet at all.
    #[traced_test]
    #[tokio::test]
    async fn match_by_key_falls_back_to_secondary_key() {
        let n = 60;
        let mut input = case_sheet(n, HEADER_ROWS);
        input[HEADER_ROWS + 17][0] = Value::Null;

        let mut output = header_block(HEADER_ROWS);
        for k in (1..=n).rev() {
            let row = match k {
                48 => data_row("", &alt_key(48), "Case title 48"),
                60 => data_row("C-9999", "ALT-9999", "Other"),
                _ => data_row(&case_id(k), &alt_key(k), &format!("Case title {k}")),
            };
            output.push(row);
        }
        let output_row = |k: usize| HEADER_ROWS + (n - k + 1);

        let h = Harness::new(
            input,
            output,
            settings(HEADER_ROWS, Placement::MatchByKey, Some(100)),
        );
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let report = h.invoke(100).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 59);
        assert_eq!(report.failed, 1);

        // Input row 50 carries case 48.
        assert_eq!(
            h.output_cell(output_row(48), CATEGORY_COL),
            Value::from("cat:Case title 48")
        );
        let entry = h.ledger().latest(&primary(48)).await.unwrap().unwrap();
        assert_eq!(entry.result.row_index, 50);
        assert_eq!(entry.result.output_index, Some(output_row(48)));

        let secondary = RowId::Secondary(alt_key(18));
        let entry = h.ledger().latest(&secondary).await.unwrap().unwrap();
        assert_eq!(entry.result.status, RowStatus::Success);
        assert_eq!(entry.result.output_index, Some(output_row(18)));
        assert_eq!(h.enricher.call_count(&secondary), 1);

        assert_eq!(h.output_cell(output_row(7), CATEGORY_COL), Value::from("cat:Case title 7"));

        let failures = h.controller.failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].row_index, 62);
        assert_eq!(failures[0].row_id, primary(60));
    }

    // Scenario: a crash lost the last cursor saves, so the cursor points at
    // rows whose results are already recorded.
    // Expected Outcome: those rows are skipped without calling the service.
    #[tokio::test]
    async fn rerun_after_lost_cursor_skips_recorded_rows() {
        let h = Harness::same_index(10, 4);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        h.invoke(4).await;
        let old = h.cursors().load().await.unwrap().unwrap();
        assert_eq!(old.next_index, 7);

        h.invoke(4).await;
        h.cursors().save(&old).await.unwrap();

        let mut h = h;
        h.restart();
        let report = h.invoke(100).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.succeeded, 2);

        for k in 1..=10 {
            assert_eq!(h.enricher.call_count(&primary(k)), 1, "case {k}");
        }
        assert_eq!(h.ledger().entries().await.unwrap().len(), 10);
    }

    // Scenario: with the output-present check on, rows that already carry
    // results are recorded as skipped.
    #[tokio::test]
    async fn rows_with_existing_output_are_skipped_when_enabled() {
        let mut output = case_sheet(4, HEADER_ROWS);
        output[HEADER_ROWS + 1][CATEGORY_COL] = Value::from("filled by hand");
        output[HEADER_ROWS + 1][CATEGORY_COL + 1] = Value::from("checked");
        let mut cfg = settings(HEADER_ROWS, Placement::SameIndex, Some(10));
        cfg.table.skip_when_output_present = true;

        let h = Harness::new(case_sheet(4, HEADER_ROWS), output, cfg);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.succeeded, 3);

        assert_eq!(h.enricher.call_count(&primary(2)), 0);
        assert_eq!(h.output_cell(4, CATEGORY_COL), Value::from("filled by hand"));
        let entry = h.ledger().latest(&primary(2)).await.unwrap().unwrap();
        assert_eq!(entry.result.status, RowStatus::SkippedAlreadyDone);
    }

    // Scenario: the previous holder crashed hours ago and left its lock.
    #[traced_test]
    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let mut cfg = settings(HEADER_ROWS, Placement::SameIndex, Some(10));
        cfg.invocation.lock_stale_after = Duration::ZERO;
        let h = Harness::new(case_sheet(3, HEADER_ROWS), case_sheet(3, HEADER_ROWS), cfg);
        InvocationLock::new(
            h.state.clone(),
            &StateKeys::new("test"),
            chrono::Duration::hours(2),
        )
        .acquire("crashed-worker")
        .await
        .unwrap();

        h.controller.start(BatchMode::AllRows).await.unwrap();
        let (_sub, mut rx) = h.controller.events().subscribe(64).await;
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert!(logs_contain("StaleLock"));

        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first.as_ref(),
            BatchEvent::LockReclaimed { holder, .. } if holder == "crashed-worker"
        ));
    }

    // Scenario: the holder of the lock crashed, then the operator pauses and
    // later cancels.
    // Expected Outcome: both apply at once instead of waiting for an
    // invocation that will never run.
    #[tokio::test]
    async fn control_requests_apply_over_a_stale_lock() {
        let mut cfg = settings(HEADER_ROWS, Placement::SameIndex, Some(2));
        cfg.invocation.lock_stale_after = Duration::ZERO;
        let h = Harness::new(case_sheet(6, HEADER_ROWS), case_sheet(6, HEADER_ROWS), cfg);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        assert_eq!(h.invoke(2).await.state, BatchState::PausedForContinuation);
        InvocationLock::new(
            h.state.clone(),
            &StateKeys::new("test"),
            chrono::Duration::hours(2),
        )
        .acquire("crashed-worker")
        .await
        .unwrap();

        assert_eq!(h.controller.pause().await.unwrap(), ControlOutcome::Applied);
        assert_eq!(
            h.controller.status().await.unwrap().state,
            BatchState::PausedByUser
        );

        assert_eq!(h.controller.cancel().await.unwrap(), ControlOutcome::Applied);
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.state, BatchState::Cancelled);
        assert_eq!(status.processed, 2);
        assert!(h.cursors().load().await.unwrap().is_none());
        assert!(matches!(
            h.controller
                .run_invocation(budget(2), &CancellationToken::new())
                .await,
            Err(EngineError::NoActiveBatch)
        ));
    }

    #[tokio::test]
    async fn live_lock_blocks_a_second_invocation() {
        let h = Harness::same_index(3, 10);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let other = InvocationLock::new(
            h.state.clone(),
            &StateKeys::new("test"),
            chrono::Duration::hours(2),
        );
        other.acquire("other-worker").await.unwrap();

        let err = h
            .controller
            .run_invocation(budget(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_lock_held());
        assert!(h.enricher.calls().is_empty());

        assert!(other.release("other-worker").await.unwrap());
        assert_eq!(h.invoke(10).await.state, BatchState::Completed);
    }

    // Scenario: the service rate-limits case 3.
    // Expected Outcome:
    // - The batch pauses for backoff on row 5 without advancing.
    // - Invoking before the backoff expires does nothing.
    // - Once it expires, row 5 is retried and the batch completes.
    #[traced_test]
    #[tokio::test]
    async fn rate_limit_pauses_without_advancing() {
        let h = Harness::same_index(5, 10);
        h.enricher.script(
            primary(3),
            vec![Err(EnrichError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            })],
        );
        h.controller.start(BatchMode::AllRows).await.unwrap();

        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::PausedForBackoff);
        assert_eq!(report.succeeded, 2);
        let until = report.backoff_until.unwrap();
        assert!(until > Utc::now());

        let cursor = h.cursors().load().await.unwrap().unwrap();
        assert_eq!(cursor.next_index, 5);
        assert_eq!(cursor.consecutive_backoffs, 1);
        assert!(h.ledger().latest(&primary(3)).await.unwrap().is_none());
        assert_eq!(h.output_cell(5, CATEGORY_COL), Value::Null);

        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::PausedForBackoff);
        assert_eq!(report.processed, 0);
        assert_eq!(h.enricher.call_count(&primary(3)), 1);

        let mut cursor = h.cursors().load().await.unwrap().unwrap();
        cursor.backoff_until = Some(Utc::now() - chrono::Duration::seconds(1));
        h.cursors().save(&cursor).await.unwrap();

        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 3);
        assert_eq!(h.enricher.call_count(&primary(3)), 2);
        assert_eq!(h.output_cell(5, CATEGORY_COL), Value::from("cat:Case title 3"));
    }

    // Scenario: writing the results of row 5 fails.
    // Expected Outcome: the invocation aborts with nothing recorded for the
    // row, and a later invocation picks it up again.
    #[tokio::test]
    async fn failed_write_leaves_row_unrecorded() {
        let h = Harness::same_index(5, 10);
        h.rows.fail_writes_to(5);
        h.controller.start(BatchMode::AllRows).await.unwrap();

        let err = h
            .controller
            .run_invocation(budget(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Step(StepError::StorageWriteFailed {
                row: 5,
                output_row: 5,
                ..
            })
        ));

        let cursor = h.cursors().load().await.unwrap().unwrap();
        assert_eq!(cursor.next_index, 5);
        assert_eq!(cursor.state, BatchState::PausedForContinuation);
        assert!(cursor.last_error.unwrap().contains("StorageWriteFailed"));
        assert!(h.ledger().latest(&primary(3)).await.unwrap().is_none());

        h.rows.heal();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 3);
        assert_eq!(h.ledger().latest_per_row().await.unwrap().len(), 5);
    }

    // Scenario: cases 2 and 4 fail; a retry batch targets exactly those rows.
    #[tokio::test]
    async fn retry_failed_targets_only_failed_rows() {
        let h = Harness::same_index(5, 10);
        h.enricher.script(
            primary(2),
            vec![Err(EnrichError::Malformed("not json".to_string()))],
        );
        h.enricher
            .script(primary(4), vec![Ok(EnrichResponse::default())]);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.failed, 2);

        let failures = h.controller.failures().await.unwrap();
        let rows: Vec<usize> = failures.iter().map(|f| f.row_index).collect();
        assert_eq!(rows, vec![4, 6]);
        let entry = h.ledger().latest(&primary(4)).await.unwrap().unwrap();
        assert!(matches!(
            entry.result.status,
            RowStatus::Failed(FailureReason::Malformed(_))
        ));

        let calls_before = h.enricher.calls().len();
        let cursor = h.controller.retry_failed().await.unwrap();
        assert_eq!(cursor.total_target, 2);
        assert_eq!(cursor.mode, BatchMode::ExplicitList(vec![4, 6]));

        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 2);
        assert_eq!(
            h.enricher.calls()[calls_before..].to_vec(),
            vec![primary(2), primary(4)]
        );
        assert!(h.controller.failures().await.unwrap().is_empty());

        assert!(matches!(
            h.controller.retry_failed().await,
            Err(EngineError::NothingToProcess(_))
        ));
    }

    #[tokio::test]
    async fn pause_resume_and_cancel() {
        let h = Harness::same_index(10, 3);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        assert_eq!(h.invoke(3).await.state, BatchState::PausedForContinuation);

        assert_eq!(h.controller.pause().await.unwrap(), ControlOutcome::Applied);
        assert_eq!(
            h.controller.status().await.unwrap().state,
            BatchState::PausedByUser
        );
        let report = h.invoke(3).await;
        assert_eq!(report.state, BatchState::PausedByUser);
        assert_eq!(report.processed, 0);

        let cursor = h.controller.resume().await.unwrap();
        assert_eq!(cursor.next_index, 6);
        let report = h.invoke(3).await;
        assert_eq!(report.state, BatchState::PausedForContinuation);
        assert_eq!(report.processed, 3);

        assert_eq!(h.controller.cancel().await.unwrap(), ControlOutcome::Applied);
        let status = h.controller.status().await.unwrap();
        assert_eq!(status.state, BatchState::Cancelled);
        assert_eq!(status.processed, 6);
        assert_eq!(h.output_cell(9, CATEGORY_COL), Value::Null);

        assert!(matches!(
            h.controller
                .run_invocation(budget(3), &CancellationToken::new())
                .await,
            Err(EngineError::NoActiveBatch)
        ));
        h.controller.start(BatchMode::FirstN(2)).await.unwrap();
    }

    // Scenario: an invocation is running elsewhere when the operator pauses.
    // Expected Outcome: the pause is recorded and honoured by the next
    // invocation before any row is processed.
    #[tokio::test]
    async fn pause_during_running_invocation_is_deferred() {
        let h = Harness::same_index(5, 10);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        InvocationLock::new(
            h.state.clone(),
            &StateKeys::new("test"),
            chrono::Duration::hours(2),
        )
        .acquire("other-worker")
        .await
        .unwrap();

        assert_eq!(h.controller.pause().await.unwrap(), ControlOutcome::Requested);
        assert_eq!(h.controller.status().await.unwrap().state, BatchState::Idle);

        h.controller.force_unlock().await.unwrap();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::PausedByUser);
        assert!(h.enricher.calls().is_empty());
    }

    #[tokio::test]
    async fn second_start_is_refused_while_active() {
        let h = Harness::same_index(5, 10);
        let first = h.controller.start(BatchMode::AllRows).await.unwrap();
        let err = h.controller.start(BatchMode::FirstN(2)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::BatchAlreadyActive { batch_id, state: BatchState::Idle } if batch_id == first.batch_id
        ));
    }

    #[traced_test]
    #[tokio::test]
    async fn corrupt_cursor_is_discarded_on_start() {
        let h = Harness::same_index(5, 10);
        h.state
            .set(&StateKeys::new("test").cursor(), vec![0xff, 0x00, 0x13])
            .await
            .unwrap();

        let status = h.controller.status().await.unwrap();
        assert!(status.last_error.unwrap().contains("corrupt"));

        let cursor = h.controller.start(BatchMode::FirstN(3)).await.unwrap();
        assert_eq!(cursor.total_target, 3);
        assert!(logs_contain("Discarding corrupt cursor"));
    }

    #[tokio::test]
    async fn explicit_rows_skip_header_rows() {
        let h = Harness::same_index(10, 10);
        let cursor = h
            .controller
            .start(BatchMode::from_row_spec("1, 4, 8-9").unwrap())
            .await
            .unwrap();
        assert_eq!(cursor.total_target, 3);

        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        let rows: BTreeSet<usize> = h
            .ledger()
            .latest_per_row()
            .await
            .unwrap()
            .iter()
            .map(|e| e.result.row_index)
            .collect();
        assert_eq!(rows, BTreeSet::from([4, 8, 9]));
        assert_eq!(h.output_cell(1, CATEGORY_COL), Value::Null);
    }

    #[tokio::test]
    async fn shutdown_before_first_row_pauses_for_continuation() {
        let h = Harness::same_index(5, 10);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let report = h
            .controller
            .run_invocation(budget(10), &token)
            .await
            .unwrap();
        assert_eq!(report.state, BatchState::PausedForContinuation);
        assert_eq!(report.processed, 0);
        assert_eq!(report.remaining, 5);

        assert_eq!(h.invoke(10).await.state, BatchState::Completed);
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        use connectors::table::RowStore;
        use engine_runtime::{context::EngineContext, controller::BatchController};
        use std::sync::Arc;

        let h = Harness::same_index(3, 10);
        let rows: Arc<dyn RowStore> = h.rows.clone();
        let controller = BatchController::new(EngineContext::new(
            h.settings.clone(),
            rows,
            h.state.clone(),
            None,
        ));
        controller.start(BatchMode::AllRows).await.unwrap();

        let err = controller
            .run_invocation(budget(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingApiKey(var) if var == "TEST_API_KEY"));
        assert_eq!(controller.status().await.unwrap().state, BatchState::Idle);
    }

    #[traced_test]
    #[tokio::test]
    async fn scheduler_runs_until_completed() {
        let h = Harness::same_index(10, 4);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let (_sub, mut rx) = h.controller.events().subscribe(256).await;

        let scheduler =
            ContinuationScheduler::new(h.controller.clone(), h.settings.invocation.clone());
        let run = scheduler
            .run_until_settled(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.invocations, 3);
        assert!(!run.interrupted);
        assert_eq!(run.last.unwrap().state, BatchState::Completed);

        let mut rows_completed = 0;
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), BatchEvent::RowCompleted { .. }) {
                rows_completed += 1;
            }
            last = Some(event);
        }
        assert_eq!(rows_completed, 10);
        assert!(matches!(
            last.as_deref(),
            Some(BatchEvent::Completed {
                processed: 10,
                failed: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn scheduler_stops_on_user_pause() {
        let h = Harness::same_index(10, 4);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        h.controller.pause().await.unwrap();

        let scheduler =
            ContinuationScheduler::new(h.controller.clone(), h.settings.invocation.clone());
        let run = scheduler
            .run_until_settled(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.invocations, 1);
        assert_eq!(run.last.unwrap().state, BatchState::PausedByUser);
        assert!(h.enricher.calls().is_empty());
    }

    // Scenario: rows 3 and 4 of the input sheet both carry case 1.
    // Expected Outcome:
    // - Row 3 is enriched, row 4 fails as a duplicate and its output stays empty.
    // - The other rows are enriched as usual.
    // - A retry of the failed rows reports the duplicate again.
    #[traced_test]
    #[tokio::test]
    async fn repeated_identifiers_are_reported_not_skipped() {
        let mut input = case_sheet(4, HEADER_ROWS);
        input[HEADER_ROWS + 1][0] = Value::from(case_id(1).as_str());
        let h = Harness::new(
            input,
            case_sheet(4, HEADER_ROWS),
            settings(HEADER_ROWS, Placement::SameIndex, Some(10)),
        );
        h.controller.start(BatchMode::AllRows).await.unwrap();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert!(logs_contain("Identifier already used by another input row"));

        assert_eq!(h.enricher.call_count(&primary(1)), 1);
        assert_eq!(h.output_cell(3, CATEGORY_COL), Value::from("cat:Case title 1"));
        assert_eq!(h.output_cell(4, CATEGORY_COL), Value::Null);
        assert_eq!(h.output_cell(6, CATEGORY_COL), Value::from("cat:Case title 4"));

        let first = h.ledger().latest(&primary(1)).await.unwrap().unwrap();
        assert_eq!(first.result.row_index, 3);
        assert_eq!(first.result.status, RowStatus::Success);

        let failures = h.controller.failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].row_index, 4);
        assert_eq!(failures[0].row_id, RowId::Position(4));
        assert!(failures[0].reason.contains("DuplicateIdentifier"));

        h.controller.retry_failed().await.unwrap();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.failed, 1);
        assert_eq!(h.enricher.call_count(&primary(1)), 1);
        assert_eq!(h.output_cell(4, CATEGORY_COL), Value::Null);
    }

    // Scenario: the settings are edited to name another output sheet while a
    // batch is part-way through.
    // Expected Outcome: the batch finishes on the sheets it started on and
    // the newly named sheet is left alone.
    #[traced_test]
    #[tokio::test]
    async fn resumed_batch_keeps_its_own_sheets() {
        let other = case_sheet(6, HEADER_ROWS);
        let mut h = Harness::over(
            MemoryRowStore::new()
                .with_sheet(INPUT, case_sheet(6, HEADER_ROWS))
                .with_sheet(OUTPUT, case_sheet(6, HEADER_ROWS))
                .with_sheet("Other", other.clone()),
            settings(HEADER_ROWS, Placement::SameIndex, Some(2)),
        );
        h.controller.start(BatchMode::AllRows).await.unwrap();
        assert_eq!(h.invoke(2).await.state, BatchState::PausedForContinuation);

        h.settings.table.output_sheet = "Other".to_string();
        h.restart();
        let report = h.invoke(10).await;
        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.succeeded, 4);
        assert!(logs_contain("Settings name a different sheet than the active batch"));

        for k in 1..=6 {
            assert_eq!(
                h.output_cell(HEADER_ROWS + k, CATEGORY_COL),
                Value::from(format!("cat:Case title {k}").as_str())
            );
        }
        assert_eq!(h.sheets.snapshot("Other").unwrap(), other);
        assert_eq!(h.ledger().latest_per_row().await.unwrap().len(), 6);
        assert_eq!(h.enricher.calls().len(), 6);
    }

    #[tokio::test]
    async fn input_sheet_is_never_written() {
        let h = Harness::same_index(2, 10);
        h.controller.start(BatchMode::AllRows).await.unwrap();
        h.invoke(10).await;
        let input = h.sheets.snapshot(INPUT).unwrap();
        let output = h.sheets.snapshot(OUTPUT).unwrap();
        assert_eq!(input[HEADER_ROWS][CATEGORY_COL], Value::Null);
        assert_eq!(output[HEADER_ROWS][CATEGORY_COL], Value::from("cat:Case title 1"));
    }
}
