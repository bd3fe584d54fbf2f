//! Human-readable rendering of transfer counters.

const PROGRESS_CELLS: u32 = 100 / 8;
const PROGRESS_PARTIAL: [char; 7] = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];

/// Percentage rounded to the nearest integer, 0 when the total is unknown.
pub fn progress_percent(total: u64, completed: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 * 100.0 / total as f64).round() as u32).min(100)
}

pub fn progress_bar(percent: u32) -> String {
    let p = percent.min(100);
    let full = p / 8;
    let mut bar = String::from("[");
    bar.push_str(&"█".repeat(full as usize));
    if p % 8 > 0 {
        bar.push(PROGRESS_PARTIAL[(p % 8 - 1) as usize]);
    }
    bar.push_str(&" ".repeat((PROGRESS_CELLS - full) as usize));
    format!("{bar}] {p}%")
}

pub fn format_size(size: u64) -> String {
    let size = size as f64;
    if size < 1000.0 {
        format!("{}B", format_number(size))
    } else if size < 1_024_000.0 {
        format!("{}KB", format_number(size / 1024.0))
    } else if size < 1_048_576_000.0 {
        format!("{}MB", format_number(size / 1_048_576.0))
    } else {
        format!("{}GB", format_number(size / 1_073_741_824.0))
    }
}

fn format_number(n: f64) -> String {
    let rounded = format!("{:.2}", (n * 100.0).round() / 100.0);
    rounded.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Remaining time at the current speed, `-` when stalled.
pub fn eta(total: u64, completed: u64, speed: u64) -> String {
    if speed == 0 {
        return "-".to_string();
    }
    let secs = (total.saturating_sub(completed) as f64 / speed as f64) as u64;
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// One status line: `<i>name</i> - [label ]<code>[bar] p%</code> of SIZE at SPEEDps, ETA: eta`.
pub fn transfer_line(name: &str, total: u64, completed: u64, speed: u64, label: Option<&str>) -> String {
    let bar = progress_bar(progress_percent(total, completed));
    let label = label.map(|l| format!("{l} ")).unwrap_or_default();
    format!(
        "<i>{name}</i> - {label}<code>{bar}</code> of {} at {}ps, ETA: {}",
        format_size(total),
        format_size(speed),
        eta(total, completed, speed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_unit_and_trim_decimals() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(999), "999B");
        assert_eq!(format_size(1536), "1.5KB");
        assert_eq!(format_size(1_048_576 * 3), "3MB");
        assert_eq!(format_size(1_073_741_824), "1GB");
    }

    #[test]
    fn progress_bar_uses_partial_cells() {
        assert_eq!(progress_bar(0), format!("[{}] 0%", " ".repeat(12)));
        assert_eq!(progress_bar(100), "[████████████▌] 100%");
        assert_eq!(progress_bar(9), format!("[█▏{}] 9%", " ".repeat(11)));
        assert_eq!(progress_bar(250), progress_bar(100));
    }

    #[test]
    fn eta_formats() {
        assert_eq!(eta(100, 0, 0), "-");
        assert_eq!(eta(100, 50, 10), "5s");
        assert_eq!(eta(7300, 0, 1), "2h 1m 40s");
        assert_eq!(eta(130, 0, 1), "2m 10s");
    }

    #[test]
    fn transfer_line_layout() {
        let line = transfer_line("a.iso", 2048, 1024, 512, Some("Uploading"));
        assert!(line.starts_with("<i>a.iso</i> - Uploading <code>["));
        assert!(line.ends_with("50%</code> of 2KB at 512Bps, ETA: 2s"));
    }

    #[test]
    fn percent_handles_unknown_total() {
        assert_eq!(progress_percent(0, 10), 0);
        assert_eq!(progress_percent(1000, 333), 33);
    }
}
