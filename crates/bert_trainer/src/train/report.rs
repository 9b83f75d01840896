//! Progress output - the per-epoch summary printed to stdout

use std::time::Duration;

use super::record::EpochRecord;

/// Elapsed time between two timestamps (seconds) as `Xm Ys`, truncating.
pub fn measure_time(start_secs: f64, end_secs: f64) -> String {
    let elapsed = end_secs - start_secs;
    let elapsed_min = (elapsed / 60.0) as i64;
    let elapsed_sec = (elapsed - (elapsed_min * 60) as f64) as i64;
    format!("{}m {}s", elapsed_min, elapsed_sec)
}

pub fn format_elapsed(elapsed: Duration) -> String {
    measure_time(0.0, elapsed.as_secs_f64())
}

pub fn format_epoch(record: &EpochRecord, n_epochs: usize) -> String {
    format!(
        concat!(
            "Epoch {}/{} | Time: {}\n",
            "  >> Train Loss: {:.3} | Train PPL: {:.2}\n",
            "  >> Valid Loss: {:.3} | Valid PPL: {:.2}\n",
        ),
        record.epoch,
        n_epochs,
        record.train_time,
        record.train_loss,
        record.train_ppl,
        record.valid_loss,
        record.valid_ppl
    )
}

pub fn print_epoch(record: &EpochRecord, n_epochs: usize) {
    println!("{}", format_epoch(record, n_epochs));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_time() {
        assert_eq!(measure_time(0.0, 125.0), "2m 5s");
        assert_eq!(measure_time(0.0, 59.0), "0m 59s");
        assert_eq!(measure_time(0.0, 3600.0), "60m 0s");
        // Truncates, never rounds up
        assert_eq!(measure_time(10.0, 129.99), "1m 59s");
        assert_eq!(format_elapsed(Duration::from_millis(61_900)), "1m 1s");
    }

    #[test]
    fn test_format_epoch() {
        let record = EpochRecord {
            epoch: 2,
            train_loss: 1.2341,
            train_ppl: 3.437,
            valid_loss: 1.5,
            valid_ppl: 4.482,
            learning_rate: 1e-3,
            train_time: "0m 12s".into(),
        };
        let text = format_epoch(&record, 5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Epoch 2/5 | Time: 0m 12s");
        assert_eq!(lines[1], "  >> Train Loss: 1.234 | Train PPL: 3.44");
        assert_eq!(lines[2], "  >> Valid Loss: 1.500 | Valid PPL: 4.48");
    }
}
