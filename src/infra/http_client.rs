use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::config::FetchConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, RETRY_AFTER};

/// reqwest-backed client: descriptive User-Agent, per-attempt timeout, no cookie store.
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, String> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "text/html")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpGetResult { status, body, retry_after })
    }
}
