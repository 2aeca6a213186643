use std::time::Duration;

use apigate_core::{DeliveryStatus, Webhook, WebhookDelivery};
use chrono::Utc;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::error::WebhookError;

/// Issues one HTTP POST for `delivery` against `webhook` and returns the
/// updated delivery record.
///
/// Never returns `Err` for a failed delivery attempt — only for errors that
/// prevented building the request at all (payload serialization). HTTP and
/// timeout failures are folded into the returned delivery's retry state.
pub async fn dispatch(
    client: &reqwest::Client,
    webhook: &Webhook,
    mut delivery: WebhookDelivery,
) -> Result<WebhookDelivery, WebhookError> {
    let body = serde_json::to_vec(&delivery.payload)?;
    let signature = apigate_crypto::sign_hmac_sha256(&body, webhook.secret.expose_secret())
        .map_err(WebhookError::Signing)?;

    debug!(webhook_id = %webhook.id, delivery_id = %delivery.id, url = %webhook.url, "dispatching webhook");

    let started = std::time::Instant::now();
    let result = client
        .post(&webhook.url)
        .timeout(Duration::from_millis(webhook.timeout_ms))
        .header("Content-Type", "application/json")
        .header("X-Webhook-Id", webhook.id.to_string())
        .header("X-Webhook-Signature", format!("sha256={signature}"))
        .body(body)
        .send()
        .await;

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    delivery.duration_ms = Some(duration_ms);
    delivery.updated_at = Utc::now();

    match result {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let response_text = response.text().await.unwrap_or_default();
            delivery.status_code = Some(status_code);
            delivery.response_body = Some(WebhookDelivery::truncate_response_body(&response_text));

            if (200..300).contains(&status_code) {
                delivery.status = DeliveryStatus::Success;
                delivery.error = None;
            } else {
                apply_failure_outcome(&mut delivery, Some(status_code), None);
            }
        }
        Err(err) => {
            warn!(webhook_id = %webhook.id, delivery_id = %delivery.id, error = %err, "webhook dispatch failed");
            let status_code = if err.is_timeout() { Some(408) } else { None };
            apply_failure_outcome(&mut delivery, status_code, Some(err.to_string()));
        }
    }

    Ok(delivery)
}

/// Apply the outcome/backoff rule to a failed attempt.
fn apply_failure_outcome(delivery: &mut WebhookDelivery, status_code: Option<u16>, error: Option<String>) {
    delivery.error = error;

    let retryable = status_code.is_none_or(WebhookDelivery::is_retryable_status);
    let failed_attempt = delivery.attempt;
    let next_attempt = failed_attempt + 1;

    if retryable && next_attempt <= delivery.max_attempts {
        delivery.status = DeliveryStatus::Retrying;
        delivery.attempt = next_attempt;
        delivery.next_retry = Some(Utc::now() + apigate_core::webhook_backoff(failed_attempt));
    } else {
        delivery.status = DeliveryStatus::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_core::EventType;
    use uuid::Uuid;

    fn delivery(attempt: u32, max_attempts: u32) -> WebhookDelivery {
        let now = Utc::now();
        WebhookDelivery {
            id: Uuid::new_v4(),
            webhook_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            event_type: EventType::KeyCreated,
            payload: serde_json::json!({}),
            status: DeliveryStatus::Pending,
            attempt,
            max_attempts,
            status_code: None,
            response_body: None,
            error: None,
            duration_ms: None,
            next_retry: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn retryable_failure_schedules_retry_with_incremented_attempt() {
        let mut d = delivery(1, 3);
        apply_failure_outcome(&mut d, Some(503), Some("boom".into()));
        assert_eq!(d.status, DeliveryStatus::Retrying);
        assert_eq!(d.attempt, 2);
        assert!(d.next_retry.is_some());
    }

    /// Scenario 6: "After the first POST, delivery is retrying, next_retry
    /// ~= now+1m." The backoff is keyed off the attempt that just failed
    /// (1), not the incremented one (2) — a regression here silently shifts
    /// the whole schedule by one step.
    #[test]
    fn backoff_is_keyed_off_the_failed_attempt_not_the_incremented_one() {
        let before = Utc::now();
        let mut d = delivery(1, 3);
        apply_failure_outcome(&mut d, Some(503), Some("boom".into()));
        let next_retry = d.next_retry.expect("retrying delivery must schedule next_retry");
        let delta = next_retry - before;
        assert!(
            delta >= chrono::Duration::seconds(55) && delta <= chrono::Duration::seconds(65),
            "expected next_retry ~= +1m after attempt 1, got {delta}"
        );
    }

    #[test]
    fn backoff_schedule_matches_attempt_table() {
        let before = Utc::now();

        let mut first = delivery(1, 5);
        apply_failure_outcome(&mut first, Some(503), None);
        let first_delta = first.next_retry.unwrap() - before;
        assert!(first_delta >= chrono::Duration::seconds(55) && first_delta <= chrono::Duration::minutes(2));

        let mut second = delivery(2, 5);
        apply_failure_outcome(&mut second, Some(503), None);
        let second_delta = second.next_retry.unwrap() - before;
        assert!(second_delta >= chrono::Duration::minutes(4) && second_delta <= chrono::Duration::minutes(6));

        let mut third = delivery(3, 5);
        apply_failure_outcome(&mut third, Some(503), None);
        let third_delta = third.next_retry.unwrap() - before;
        assert!(third_delta >= chrono::Duration::minutes(29) && third_delta <= chrono::Duration::minutes(31));
    }

    #[test]
    fn retryable_failure_past_max_attempts_marks_failed() {
        let mut d = delivery(3, 3);
        apply_failure_outcome(&mut d, Some(503), Some("boom".into()));
        assert_eq!(d.status, DeliveryStatus::Failed);
    }

    #[test]
    fn non_retryable_status_marks_failed_immediately() {
        let mut d = delivery(1, 5);
        apply_failure_outcome(&mut d, Some(400), Some("bad request".into()));
        assert_eq!(d.status, DeliveryStatus::Failed);
    }

    #[test]
    fn timeout_without_status_code_is_retryable() {
        let mut d = delivery(1, 3);
        apply_failure_outcome(&mut d, None, Some("timed out".into()));
        assert_eq!(d.status, DeliveryStatus::Retrying);
    }
}
