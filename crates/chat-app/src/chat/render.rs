use chatline_core::{AuxiliaryPayload, LoadingState, RenderedItem, Role};

const LOADING_PREFIX: &str = "The AI is: ";

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

fn render_payload(payload: &AuxiliaryPayload) -> String {
    let kind = payload.kind.as_deref().unwrap_or("data");
    format!("  [{kind}] {}", payload.value)
}

pub fn render_item(item: &RenderedItem) -> String {
    let mut out = format!("{}: {}", speaker(item.turn.role), item.turn.content);
    for payload in &item.payloads {
        out.push('\n');
        out.push_str(&render_payload(payload));
    }
    out
}

pub fn render_thread(items: &[RenderedItem]) -> String {
    items
        .iter()
        .map(render_item)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `None` while no request is outstanding; the indicator is hidden then.
pub fn render_loading(state: &LoadingState) -> Option<String> {
    state
        .active
        .then(|| format!("{LOADING_PREFIX}{}", state.status))
}

#[cfg(test)]
mod tests {
    use chatline_core::{LoadingRotator, RotatorConfig, Turn, TurnId};
    use serde_json::json;

    use super::*;

    #[test]
    fn turns_render_with_their_payloads() {
        let item = RenderedItem {
            turn: Turn::assistant(TurnId::new(2), "Try the 50/30/20 rule."),
            payloads: vec![
                AuxiliaryPayload::new(json!("budget.pdf")),
                AuxiliaryPayload::new(json!({ "name": "lookup" })).with_kind("tool_call"),
            ],
        };

        assert_eq!(
            render_item(&item),
            "assistant: Try the 50/30/20 rule.\n  [data] \"budget.pdf\"\n  [tool_call] {\"name\":\"lookup\"}"
        );
    }

    #[test]
    fn thread_joins_items_in_order() {
        let items = vec![
            RenderedItem::plain(Turn::user(TurnId::new(1), "hi")),
            RenderedItem::plain(Turn::assistant(TurnId::new(2), "hello")),
        ];
        assert_eq!(render_thread(&items), "you: hi\nassistant: hello");
        assert_eq!(render_thread(&[]), "");
    }

    #[tokio::test]
    async fn loading_line_only_shows_while_active() {
        let mut rotator =
            LoadingRotator::new(RotatorConfig::default()).expect("stock config is valid");
        assert_eq!(render_loading(&rotator.state()), None);

        rotator.start();
        assert_eq!(
            render_loading(&rotator.state()).as_deref(),
            Some("The AI is: Getting Advice....")
        );

        rotator.stop();
        assert_eq!(render_loading(&rotator.state()), None);
    }
}
