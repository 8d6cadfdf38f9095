//! reqwest implementation of the accrual client.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use super::{AccrualClient, QueryOutcome};
use crate::storage::OrderStatus;

/// Transient failures are retried this many times on top of the first
/// attempt. Terminal and 204 responses are never retried.
const MAX_RETRIES: u32 = 2;

/// Back-off applied when a 429 arrives without a Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct AccrualReply {
    #[allow(dead_code)]
    order: String,
    status: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    accrual: Option<Decimal>,
}

pub struct HttpAccrualClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn query_once(&self, order_num: &str) -> QueryOutcome {
        let url = format!("{}/api/orders/{}", self.base_url, order_num);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(order = order_num, error = %err, "accrual request failed");
                return QueryOutcome::TransientFailure;
            }
        };

        match response.status() {
            StatusCode::NO_CONTENT => QueryOutcome::NotReady,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                QueryOutcome::RateLimited { retry_after }
            }
            StatusCode::OK => match response.json::<AccrualReply>().await {
                Ok(reply) => decode_reply(order_num, reply),
                Err(err) => {
                    tracing::warn!(order = order_num, error = %err, "bad accrual reply body");
                    QueryOutcome::TransientFailure
                }
            },
            status => {
                tracing::warn!(order = order_num, %status, "unexpected accrual status");
                QueryOutcome::TransientFailure
            }
        }
    }
}

fn decode_reply(order_num: &str, reply: AccrualReply) -> QueryOutcome {
    match reply.status.as_str() {
        "PROCESSED" => QueryOutcome::Terminal {
            status: OrderStatus::Processed,
            accrual: reply.accrual.unwrap_or(Decimal::ZERO),
        },
        "INVALID" => QueryOutcome::Terminal {
            status: OrderStatus::Invalid,
            accrual: Decimal::ZERO,
        },
        "REGISTERED" | "PROCESSING" => QueryOutcome::NotReady,
        other => {
            tracing::warn!(order = order_num, status = other, "unknown accrual status");
            QueryOutcome::TransientFailure
        }
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn query(&self, order_num: &str) -> QueryOutcome {
        let mut attempt = 0;
        loop {
            let outcome = self.query_once(order_num).await;
            match outcome {
                QueryOutcome::TransientFailure if attempt < MAX_RETRIES => {
                    attempt += 1;
                }
                QueryOutcome::RateLimited { retry_after } if attempt < MAX_RETRIES => {
                    // Honor Retry-After before the in-client retry; if the
                    // service is still limiting afterwards, surface it so
                    // the whole checker pool backs off.
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: &str, accrual: Option<f64>) -> AccrualReply {
        AccrualReply {
            order: "12345678903".to_string(),
            status: status.to_string(),
            accrual: accrual.map(|a| Decimal::try_from(a).unwrap()),
        }
    }

    #[test]
    fn processed_reply_carries_accrual() {
        let outcome = decode_reply("12345678903", reply("PROCESSED", Some(500.0)));
        assert_eq!(
            outcome,
            QueryOutcome::Terminal {
                status: OrderStatus::Processed,
                accrual: Decimal::new(500, 0),
            }
        );
    }

    #[test]
    fn processed_reply_without_accrual_is_zero() {
        let outcome = decode_reply("12345678903", reply("PROCESSED", None));
        assert_eq!(
            outcome,
            QueryOutcome::Terminal {
                status: OrderStatus::Processed,
                accrual: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn invalid_reply_never_carries_accrual() {
        let outcome = decode_reply("12345678903", reply("INVALID", Some(100.0)));
        assert_eq!(
            outcome,
            QueryOutcome::Terminal {
                status: OrderStatus::Invalid,
                accrual: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn non_terminal_statuses_are_not_ready() {
        for status in ["REGISTERED", "PROCESSING"] {
            assert_eq!(
                decode_reply("12345678903", reply(status, None)),
                QueryOutcome::NotReady
            );
        }
    }

    #[test]
    fn unknown_status_is_transient() {
        assert_eq!(
            decode_reply("12345678903", reply("QUEUED", None)),
            QueryOutcome::TransientFailure
        );
    }

    #[test]
    fn accrual_body_parses_json_numbers() {
        let reply: AccrualReply =
            serde_json::from_str(r#"{"order":"12345678903","status":"PROCESSED","accrual":500.5}"#)
                .unwrap();
        assert_eq!(reply.accrual, Some(Decimal::new(5005, 1)));

        let no_accrual: AccrualReply =
            serde_json::from_str(r#"{"order":"12345678903","status":"PROCESSING"}"#).unwrap();
        assert_eq!(no_accrual.accrual, None);
    }
}
