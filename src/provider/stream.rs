//! Tool-call assembly shared by the streaming clients.

use crate::provider::types::{StreamEvent, ToolBuilder};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Tool calls being assembled, keyed by their position in the response.
///
/// Anthropic announces id and name on block start (`insert`) and closes the
/// block explicitly (`remove`). OpenAI sends everything as deltas
/// (`get_or_insert`) and the calls are flushed at the end (`drain_into`).
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    builders: BTreeMap<usize, ToolBuilder>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, index: usize) -> &mut ToolBuilder {
        self.builders.entry(index).or_default()
    }

    pub fn insert(&mut self, index: usize, builder: ToolBuilder) {
        self.builders.insert(index, builder);
    }

    pub fn remove(&mut self, index: usize) -> Option<ToolBuilder> {
        self.builders.remove(&index)
    }

    /// Emit every pending call in index order.
    pub async fn drain_into(&mut self, tx: &mpsc::Sender<StreamEvent>) {
        for (index, builder) in std::mem::take(&mut self.builders) {
            if let Some(call) = builder.finish() {
                tracing::debug!(index, id = %call.id, name = %call.name, "Emitting tool call");
                let _ = tx.send(StreamEvent::ToolCall(call)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_in_index_order() {
        let mut acc = ToolCallAccumulator::new();
        let second = acc.get_or_insert(1);
        second.id = Some("b".into());
        second.name = Some("two".into());
        acc.insert(0, ToolBuilder::with_id_name("a".into(), "one".into()));

        let (tx, mut rx) = mpsc::channel(4);
        acc.drain_into(&tx).await;
        drop(tx);
        let mut ids = Vec::new();
        while let Some(StreamEvent::ToolCall(call)) = rx.recv().await {
            ids.push(call.id);
        }
        assert_eq!(ids, ["a", "b"]);
        assert!(acc.remove(0).is_none());
    }
}
