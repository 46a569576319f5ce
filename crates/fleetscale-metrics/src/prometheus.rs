//! Prometheus text exposition format.
//!
//! Renders per-action API call aggregates for scraping by a Prometheus
//! server or compatible agent.

use crate::collector::ActionStats;

/// Render per-action aggregates into Prometheus text format.
///
/// Produces COUNTER and GAUGE metrics with `action` labels.
pub fn render_prometheus(stats: &[ActionStats]) -> String {
    let mut out = String::new();

    out.push_str("# HELP fleetscale_api_calls_total Remote compute API calls.\n");
    out.push_str("# TYPE fleetscale_api_calls_total counter\n");
    for s in stats {
        out.push_str(&format!(
            "fleetscale_api_calls_total{{action=\"{}\"}} {}\n",
            s.action, s.calls
        ));
    }

    out.push_str("# HELP fleetscale_api_failures_total Remote compute API calls with a non-zero status.\n");
    out.push_str("# TYPE fleetscale_api_failures_total counter\n");
    for s in stats {
        out.push_str(&format!(
            "fleetscale_api_failures_total{{action=\"{}\"}} {}\n",
            s.action, s.failures
        ));
    }

    out.push_str("# HELP fleetscale_api_latency_ms_sum Total latency of remote calls in milliseconds.\n");
    out.push_str("# TYPE fleetscale_api_latency_ms_sum counter\n");
    for s in stats {
        out.push_str(&format!(
            "fleetscale_api_latency_ms_sum{{action=\"{}\"}} {:.2}\n",
            s.action, s.latency_ms_sum
        ));
    }

    out.push_str("# HELP fleetscale_api_last_status Return code of the most recent call.\n");
    out.push_str("# TYPE fleetscale_api_last_status gauge\n");
    for s in stats {
        out.push_str(&format!(
            "fleetscale_api_last_status{{action=\"{}\"}} {}\n",
            s.action, s.last_status
        ));
    }

    out
}
