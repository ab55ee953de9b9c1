use crate::turn::{AuxiliaryPayload, RenderedItem, Turn};

/// Pairs turns with side-channel payloads by position.
///
/// The i-th payload attaches to the i-th turn. Turns past the end of the payload
/// sequence get nothing. Payloads past the last turn are appended, in order, to the
/// last turn so no data is lost; with no turns at all the result is empty.
///
/// `None` and an empty slice are treated the same. Inputs are never modified and the
/// output always has exactly one item per turn, in turn order.
pub fn merge_payloads(turns: &[Turn], payloads: Option<&[AuxiliaryPayload]>) -> Vec<RenderedItem> {
    let payloads = payloads.unwrap_or_default();
    let mut items = turns
        .iter()
        .cloned()
        .map(RenderedItem::plain)
        .collect::<Vec<_>>();

    if payloads.is_empty() {
        return items;
    }

    let last_index = items.len().saturating_sub(1);
    for (index, payload) in payloads.iter().enumerate() {
        let Some(item) = items.get_mut(index.min(last_index)) else {
            break;
        };
        item.payloads.push(payload.clone());
    }

    items
}

/// Caches the last merge so repeated renders with unchanged inputs skip the work.
#[derive(Debug, Default)]
pub struct MergedThread {
    turns: Vec<Turn>,
    payloads: Vec<AuxiliaryPayload>,
    items: Vec<RenderedItem>,
    dirty: bool,
}

impl MergedThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the inputs; the merge is recomputed lazily on the next `items` call.
    pub fn update(&mut self, turns: &[Turn], payloads: &[AuxiliaryPayload]) {
        if self.turns.as_slice() == turns && self.payloads.as_slice() == payloads {
            return;
        }

        self.turns = turns.to_vec();
        self.payloads = payloads.to_vec();
        self.dirty = true;
    }

    pub fn items(&mut self) -> &[RenderedItem] {
        if self.dirty {
            self.items = merge_payloads(&self.turns, Some(&self.payloads));
            self.dirty = false;
        }
        &self.items
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
