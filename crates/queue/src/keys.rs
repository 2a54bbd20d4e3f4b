//! Canonical key/queue-name formats used by the engine (spec §6).

/// Cache key an engine's dev-mode path reads/writes a node's last output.
pub fn dev_output_key(node_id: &str) -> String {
    format!("dev:out:{node_id}")
}

/// Queue name synthesized by the builder's `QueueMapper` post-processor for
/// a writer/reader pair.
pub fn queue_name(writer_id: &str, reader_id: &str) -> String {
    format!("queue_{writer_id}_{reader_id}")
}

/// Cache key for a workflow's dead-letter sink.
pub fn dlq_key(workflow_id: &str) -> String {
    format!("dlq:{workflow_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_the_documented_formats() {
        assert_eq!(dev_output_key("n1"), "dev:out:n1");
        assert_eq!(queue_name("w", "r"), "queue_w_r");
        assert_eq!(dlq_key("wf-1"), "dlq:wf-1");
    }
}
