/// Outbound booking-event notifications.
///
/// A single configured webhook URL receives a JSON envelope per event.
/// Delivery is best-effort: failures are logged and never bubble up to the
/// client-facing request.
pub async fn send_event(webhook_url: &str, event: &str, payload: serde_json::Value) {
    if webhook_url.is_empty() {
        return;
    }

    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "event": event,
        "data": payload,
    });

    if let Err(e) = client.post(webhook_url).json(&body).send().await {
        tracing::error!("webhook '{}' delivery failed: {}", event, e);
    }
}
