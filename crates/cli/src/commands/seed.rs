use rebook_db::ReservationSeedDataset;

use crate::commands::{init_logging, migrated_pool, prepare, CommandResult, StepError};

/// Loads the demo reservations. With `reset`, seeded rows and everything written against the
/// seeded bookings are removed first, restoring the original inventory.
pub fn run(reset: bool) -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    init_logging(&config);

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;

        if reset {
            ReservationSeedDataset::clean(&pool)
                .await
                .map_err(|error| ("seed_reset", error.to_string(), 5u8))?;
        }

        let seed_result = ReservationSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = ReservationSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, StepError> = if !verification.all_present {
            let failed_checks = failed_checks(&verification.checks);
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        } else {
            Ok(SeedOutput {
                bookings: seed_result.bookings_seeded,
                trips: seed_result.trips_seeded,
            })
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => CommandResult::success(
            "seed",
            format!(
                "reservation seed dataset loaded: {} bookings ({}), {} trips",
                output.bookings.len(),
                output.bookings.join(", "),
                output.trips
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    bookings: Vec<&'static str>,
    trips: usize,
}

fn failed_checks(checks: &[(&'static str, bool)]) -> Vec<&'static str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect()
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!(
            "Seed verification failed for checks: {} (run `rebook seed --reset` to restore)",
            failed_checks.join(", ")
        )
    }
}
