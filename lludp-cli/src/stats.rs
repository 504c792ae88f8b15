//! Statistics display and formatting

use lludp_transport::CircuitStats;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a round-trip time in human-readable form
pub fn format_rtt(rtt: Option<Duration>) -> String {
    match rtt {
        Some(rtt) if rtt.as_secs() >= 1 => format!("{:.2}s", rtt.as_secs_f64()),
        Some(rtt) => format!("{:.2}ms", rtt.as_secs_f64() * 1000.0),
        None => "n/a".to_string(),
    }
}

/// Format a duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display circuit statistics
pub fn display_circuit_stats(stats: &CircuitStats) {
    println!("\n┌──────────────────────────────────────────────┐");
    println!("│ CIRCUIT STATISTICS                           │");
    println!("├──────────────────────────────────────────────┤");
    println!(
        "│ Packets:   {} sent / {} received",
        stats.packets_sent, stats.packets_received
    );
    println!(
        "│ Bytes:     {} sent / {} received",
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received)
    );
    println!(
        "│ Reliable:  {} resends / {} lost",
        stats.resends, stats.packets_lost
    );
    println!(
        "│ ACKs:      {} sent / {} received",
        stats.acks_sent, stats.acks_received
    );
    println!("│ Dupes:     {} suppressed", stats.duplicates);
    println!("│ Ping RTT:  {}", format_rtt(stats.last_ping_rtt));
    println!("└──────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(None), "n/a");
        assert_eq!(format_rtt(Some(Duration::from_millis(42))), "42.00ms");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3700)), "1h 01m 40s");
    }
}
