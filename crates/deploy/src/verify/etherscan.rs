//! Etherscan-compatible contract verification API.

use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Deserializer};
use url::Url;

use super::{ServiceResponse, VerificationRequest, VerificationService};
use crate::{ExplorerConfig, rpc};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope of every Etherscan API answer.
#[derive(Debug, Clone, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    result: String,
}

/// Blockscout answers `"result": null` where Etherscan omits the field.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExplorerResponse {
    /// The most descriptive text of the answer.
    fn detail(&self) -> &str {
        if self.result.is_empty() {
            &self.message
        } else {
            &self.result
        }
    }
}

/// What a `verifysourcecode` answer means.
#[derive(Debug, PartialEq, Eq)]
enum Submission {
    /// Accepted for processing under this GUID.
    Queued(String),
    Done(ServiceResponse),
}

/// Intermediate state of a `checkverifystatus` poll.
#[derive(Debug)]
enum StatusPoll {
    Pending,
    Unreachable(String),
}

/// [`VerificationService`] backed by an Etherscan-style explorer API.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    poll_interval: Duration,
    max_polls: usize,
}

impl EtherscanVerifier {
    pub fn new(explorer: &ExplorerConfig) -> anyhow::Result<Self> {
        let api_url = Url::parse(&explorer.api_url)
            .with_context(|| format!("Invalid explorer API URL: {}", explorer.api_url))?;

        Ok(Self {
            client: rpc::create_client(REQUEST_TIMEOUT)?,
            api_url,
            api_key: explorer.api_key.clone(),
            poll_interval: Duration::from_secs(5),
            max_polls: 24,
        })
    }

    /// Override the API key of the explorer configuration.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn submit(&self, request: &VerificationRequest) -> anyhow::Result<ExplorerResponse> {
        let mut form = submission_form(request)?;
        if let Some(key) = &self.api_key {
            form.push(("apikey", key.clone()));
        }

        self.client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .context("Failed to send verification request")?
            .error_for_status()
            .context("Explorer refused the request")?
            .json()
            .await
            .context("Failed to parse verification response")
    }

    async fn check_status(&self, guid: &str) -> Result<ServiceResponse, StatusPoll> {
        let mut query = vec![
            ("module", "contract"),
            ("action", "checkverifystatus"),
            ("guid", guid),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        let unreachable = |e: reqwest::Error| StatusPoll::Unreachable(e.to_string());
        let response: ExplorerResponse = self
            .client
            .get(self.api_url.clone())
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(unreachable)?
            .json()
            .await
            .map_err(unreachable)?;

        match classify_status(&response) {
            Some(outcome) => Ok(outcome),
            None => {
                tracing::debug!(guid, status = %response.detail(), "Verification pending");
                Err(StatusPoll::Pending)
            }
        }
    }
}

impl VerificationService for EtherscanVerifier {
    async fn verify(&self, request: &VerificationRequest) -> ServiceResponse {
        let response = match self.submit(request).await {
            Ok(response) => response,
            Err(e) => return ServiceResponse::Unreachable(format!("{e:#}")),
        };

        let guid = match classify_submission(&response) {
            Submission::Queued(guid) => guid,
            Submission::Done(outcome) => return outcome,
        };

        tracing::debug!(unit = %request.unit, %guid, "Verification submitted");
        tokio::time::sleep(self.poll_interval).await;

        (|| self.check_status(&guid))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.max_polls),
            )
            .when(|poll| matches!(poll, StatusPoll::Pending))
            .await
            .unwrap_or_else(|poll| match poll {
                StatusPoll::Unreachable(reason) => ServiceResponse::Unreachable(reason),
                StatusPoll::Pending => ServiceResponse::Unreachable(format!(
                    "still pending after {} status checks",
                    self.max_polls + 1
                )),
            })
    }
}

/// Form fields of a `verifysourcecode` request, without the API key.
fn submission_form(request: &VerificationRequest) -> anyhow::Result<Vec<(&'static str, String)>> {
    let source = &request.source;
    let standard_json = serde_json::to_string(&source.standard_json)
        .context("Failed to serialize compiler input")?;

    Ok(vec![
        ("module", "contract".to_string()),
        ("action", "verifysourcecode".to_string()),
        ("contractaddress", request.address.to_string()),
        ("sourceCode", standard_json),
        ("codeformat", "solidity-standard-json-input".to_string()),
        ("contractname", source.fully_qualified_name()),
        ("compilerversion", format!("v{}", source.compiler_version)),
        // sic: the parameter name is misspelled in the Etherscan API
        ("constructorArguements", hex::encode(&request.constructor_args)),
    ])
}

fn is_already_verified(text: &str) -> bool {
    text.to_ascii_lowercase().contains("already verified")
}

fn is_rate_limited(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("rate limit") || text.contains("max calls")
}

fn classify_submission(response: &ExplorerResponse) -> Submission {
    let detail = response.detail();

    if response.status == "1" && !response.result.is_empty() {
        return Submission::Queued(response.result.clone());
    }

    if is_already_verified(detail) {
        Submission::Done(ServiceResponse::AlreadyVerified)
    } else if is_rate_limited(detail) {
        Submission::Done(ServiceResponse::Unreachable(detail.to_string()))
    } else {
        Submission::Done(ServiceResponse::Rejected(detail.to_string()))
    }
}

/// Final outcome of a status answer, or `None` while the job is queued.
fn classify_status(response: &ExplorerResponse) -> Option<ServiceResponse> {
    let detail = response.detail();
    let lower = detail.to_ascii_lowercase();

    if lower.contains("pending") || lower.contains("in queue") {
        None
    } else if is_already_verified(detail) {
        Some(ServiceResponse::AlreadyVerified)
    } else if lower.starts_with("pass") {
        Some(ServiceResponse::Verified)
    } else if is_rate_limited(detail) {
        Some(ServiceResponse::Unreachable(detail.to_string()))
    } else {
        Some(ServiceResponse::Rejected(detail.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, Bytes};
    use serde_json::json;

    use super::*;
    use crate::SourceMetadata;

    fn response(status: &str, message: &str, result: &str) -> ExplorerResponse {
        ExplorerResponse {
            status: status.to_string(),
            message: message.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_submission_queued() {
        assert_eq!(
            classify_submission(&response("1", "OK", "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn")),
            Submission::Queued("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".to_string())
        );
    }

    #[test]
    fn test_submission_already_verified() {
        assert_eq!(
            classify_submission(&response("0", "NOTOK", "Contract source code already verified")),
            Submission::Done(ServiceResponse::AlreadyVerified)
        );
    }

    #[test]
    fn test_submission_rate_limit_is_unreachable() {
        assert!(matches!(
            classify_submission(&response("0", "NOTOK", "Max rate limit reached")),
            Submission::Done(ServiceResponse::Unreachable(_))
        ));
    }

    #[test]
    fn test_submission_rejection_keeps_reason() {
        assert_eq!(
            classify_submission(&response("0", "NOTOK", "Invalid constructor arguments provided")),
            Submission::Done(ServiceResponse::Rejected(
                "Invalid constructor arguments provided".to_string()
            ))
        );
        assert_eq!(
            classify_submission(&response("0", "Invalid API Key", "")),
            Submission::Done(ServiceResponse::Rejected("Invalid API Key".to_string()))
        );
    }

    #[test]
    fn test_null_result_keeps_rejection_reason() {
        let parsed: ExplorerResponse = serde_json::from_value(json!({
            "status": "0",
            "message": "Unable to locate ContractCode",
            "result": null,
        }))
        .unwrap();

        assert_eq!(parsed.result, "");
        assert_eq!(
            classify_submission(&parsed),
            Submission::Done(ServiceResponse::Rejected(
                "Unable to locate ContractCode".to_string()
            ))
        );
    }

    #[test]
    fn test_status_answers() {
        assert_eq!(classify_status(&response("0", "NOTOK", "Pending in queue")), None);
        assert_eq!(
            classify_status(&response("1", "OK", "Pass - Verified")),
            Some(ServiceResponse::Verified)
        );
        assert_eq!(
            classify_status(&response("1", "OK", "Already Verified")),
            Some(ServiceResponse::AlreadyVerified)
        );
        assert_eq!(
            classify_status(&response("0", "NOTOK", "Fail - Unable to verify")),
            Some(ServiceResponse::Rejected("Fail - Unable to verify".to_string()))
        );
    }

    #[test]
    fn test_submission_form() {
        let request = VerificationRequest {
            unit: "router".to_string(),
            address: Address::with_last_byte(0x42),
            constructor_args: Bytes::from(vec![0xab, 0xcd]),
            source: SourceMetadata {
                source_name: "contracts/NeroDEXRouter.sol".to_string(),
                contract_name: "NeroDEXRouter".to_string(),
                compiler_version: "0.7.6+commit.7338295f".to_string(),
                standard_json: json!({ "language": "Solidity" }),
            },
        };

        let form = submission_form(&request).unwrap();
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.as_str())
                .unwrap()
        };

        assert_eq!(field("action"), "verifysourcecode");
        assert_eq!(field("contractname"), "contracts/NeroDEXRouter.sol:NeroDEXRouter");
        assert_eq!(field("compilerversion"), "v0.7.6+commit.7338295f");
        assert_eq!(field("constructorArguements"), "abcd");
        assert_eq!(field("sourceCode"), r#"{"language":"Solidity"}"#);
        assert!(field("contractaddress").ends_with("42"));
    }

    #[test]
    fn test_invalid_api_url_is_rejected() {
        let explorer = ExplorerConfig {
            api_url: "not a url".to_string(),
            browser_url: None,
            api_key: None,
        };
        assert!(EtherscanVerifier::new(&explorer).is_err());
    }
}
