//! Statistics display and formatting

use std::time::Duration;
use vidcast::protocol::ReorderStats;
use vidcast::{ReceiverReport, ServerSummary};

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

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
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

/// Lost packets as a percentage of everything the stream should have had
pub fn loss_percent(stats: &ReorderStats) -> f64 {
    let expected = stats.delivered_packets + stats.lost_packets;
    if expected == 0 {
        0.0
    } else {
        stats.lost_packets as f64 * 100.0 / expected as f64
    }
}

fn stats_row(label: &str, stats: &ReorderStats) {
    println!(
        "│ {:9} │ {:>9} │ {:>10} │ {:>7} │ {:>6.2}% │ {:>7} │ {:>5} │",
        label,
        stats.delivered_packets,
        format_bytes(stats.delivered_bytes),
        stats.lost_packets,
        loss_percent(stats),
        stats.out_of_order_packets,
        stats.duplicate_packets
    );
}

/// Display the receiver's final report
pub fn display_receiver_summary(report: &ReceiverReport, elapsed: Duration) {
    println!("\n┌───────────────────────────────────────────────────────────────────────────┐");
    println!("│ RECEIVER SUMMARY                                                          │");
    println!("├───────────────────────────────────────────────────────────────────────────┤");
    println!(
        "│ Runtime: {}   Streams: {}   Stalls: {}   Malformed: {}",
        format_duration(elapsed),
        report.streams,
        report.stalls,
        report.malformed
    );
    println!(
        "│ Written: {}   Deregistered: {}",
        format_bytes(report.bytes_written),
        if report.deregistered { "yes" } else { "no" }
    );
    println!("├───────────┬───────────┬────────────┬─────────┬─────────┬─────────┬───────┤");
    println!("│           │ Delivered │ Bytes      │ Lost    │ Loss    │ Reorder │ Dups  │");
    println!("├───────────┼───────────┼────────────┼─────────┼─────────┼─────────┼───────┤");
    stats_row("Last", &report.last_stream);
    stats_row("Lifetime", &report.lifetime);
    println!("└───────────┴───────────┴────────────┴─────────┴─────────┴─────────┴───────┘");
}

/// Display the server's final summary
pub fn display_server_summary(summary: &ServerSummary, elapsed: Duration) {
    let throughput_bps = if elapsed.as_secs() > 0 {
        (summary.pacer.bytes_sent * 8) / elapsed.as_secs()
    } else {
        0
    };

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ SERVER SUMMARY                                              │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Uptime: {}   Streams: {} ({} completed)",
        format_duration(elapsed),
        summary.streams,
        summary.completed_streams
    );
    println!(
        "│ Packets: {}   Bytes: {}   Rate: {}",
        summary.pacer.packets_sent,
        format_bytes(summary.pacer.bytes_sent),
        format_bandwidth(throughput_bps)
    );
    println!(
        "│ Send failures: {}   Evicted: {}   Max lag: {:?}",
        summary.pacer.send_failures, summary.pacer.evicted, summary.pacer.max_lag
    );
    println!(
        "│ Registrations: {}   Deregistrations: {}   Rejected: {}",
        summary.listener.registrations,
        summary.listener.deregistrations,
        summary.listener.rejected
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

/// One-line progress for the periodic log
pub fn compact_stats(current: &ReorderStats, lifetime: &ReorderStats) -> String {
    format!(
        "stream: {} pkts ({}), lost {} ({:.2}%), reordered {} | total: {} pkts, lost {}",
        current.delivered_packets,
        format_bytes(current.delivered_bytes),
        current.lost_packets,
        loss_percent(current),
        current.out_of_order_packets,
        lifetime.delivered_packets,
        lifetime.lost_packets
    )
}
