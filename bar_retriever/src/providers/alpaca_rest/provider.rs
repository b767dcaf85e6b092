use async_trait::async_trait;
use chrono::NaiveTime;
use chrono_tz::Tz;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::get_env_var;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{bar::Bar, bar_series::BarSeries, request_params::FetchRequest},
    providers::{
        ApiSnafu, ClientBuildSnafu, InternalSnafu, InvalidApiKeySnafu, MarketDataProvider,
        MissingEnvVarSnafu, ProviderError, ProviderInitError, ReqwestSnafu,
        alpaca_rest::{
            params::{AlpacaBarsParams, construct_params},
            response::{AlpacaBar, AlpacaResponse},
        },
    },
};

const BASE_URL: &str = "https://data.alpaca.markets/v2/stocks/bars";

/// Zone Alpaca's US equity sessions are defined in.
const EXCHANGE_TZ: Tz = chrono_tz::America::New_York;

const REGULAR_OPEN: NaiveTime = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
const REGULAR_CLOSE: NaiveTime = NaiveTime::from_hms_opt(16, 0, 0).unwrap();

pub struct AlpacaProvider {
    client: Client,
    base_url: String,
    params: AlpacaBarsParams,
    limiter: DefaultDirectRateLimiter,
    _api_key: SecretString,
    _secret_key: SecretString,
}

impl AlpacaProvider {
    /// Creates a new Alpaca provider.
    ///
    /// Reads API keys from the `APCA_API_KEY_ID` and `APCA_API_SECRET_KEY`
    /// environment variables. Requests are throttled to the free plan's
    /// 200 calls per minute.
    pub fn new() -> Result<Self, ProviderInitError> {
        let api_key = get_env_var("APCA_API_KEY_ID").context(MissingEnvVarSnafu)?;
        let secret_key = get_env_var("APCA_API_SECRET_KEY").context(MissingEnvVarSnafu)?;
        Self::with_credentials(api_key.into(), secret_key.into())
    }

    /// Creates a provider from explicit credentials.
    pub fn with_credentials(
        api_key: SecretString,
        secret_key: SecretString,
    ) -> Result<Self, ProviderInitError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            header::HeaderValue::from_str(api_key.expose_secret()).context(InvalidApiKeySnafu)?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            header::HeaderValue::from_str(secret_key.expose_secret())
                .context(InvalidApiKeySnafu)?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            params: AlpacaBarsParams::default(),
            limiter: RateLimiter::direct(Quota::per_minute(nonzero!(200u32))),
            _api_key: api_key,
            _secret_key: secret_key,
        })
    }

    /// Overrides feed, adjustment, and page size for every request.
    pub fn with_params(mut self, params: AlpacaBarsParams) -> Self {
        self.params = params;
        self
    }

    /// Points the provider at another deployment of the bars endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn fetch_page(
        &self,
        req: &FetchRequest,
        page_token: Option<&str>,
    ) -> Result<AlpacaResponse, ProviderError> {
        let mut query_params = construct_params(req, &self.params)?;
        if let Some(token) = page_token {
            query_params.push(("page_token".to_string(), token.to_string()));
        }

        self.limiter.until_ready().await;
        let response = self
            .client
            .get(&self.base_url)
            .query(&query_params)
            .send()
            .await
            .context(ReqwestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return ApiSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        response.json::<AlpacaResponse>().await.context(ReqwestSnafu)
    }
}

/// Whether a bar starting at `bar` lies inside the 09:30–16:00 exchange session.
pub fn in_regular_session(bar: &Bar) -> bool {
    let t = bar.timestamp().with_timezone(&EXCHANGE_TZ).time();
    REGULAR_OPEN <= t && t < REGULAR_CLOSE
}

#[async_trait]
impl MarketDataProvider for AlpacaProvider {
    async fn fetch(&self, req: &FetchRequest) -> Result<BarSeries, ProviderError> {
        let mut collected: Vec<AlpacaBar> = Vec::new();
        let mut next_page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(req, next_page_token.as_deref()).await?;
            pages += 1;

            for (symbol, bars) in page.bars {
                if symbol == req.symbol {
                    collected.extend(bars);
                }
            }

            match page.next_page_token {
                Some(token) if Some(&token) == next_page_token.as_ref() => {
                    return InternalSnafu {
                        message: format!("page token {token} repeated"),
                    }
                    .fail();
                }
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        // Alpaca treats `end` as inclusive; the request is half-open.
        let mut series = BarSeries::new(req.symbol.clone(), req.bar_size);
        let regular_only = req.bar_size.is_intraday() && !req.include_after_hours;
        series.extend(
            collected
                .into_iter()
                .map(Bar::from)
                .filter(|b| req.contains(b.timestamp()))
                .filter(|b| !regular_only || in_regular_session(b)),
        );

        debug!(
            symbol = %req.symbol,
            bar_size = %req.bar_size,
            pages,
            bars = series.len(),
            "alpaca fetch complete"
        );
        Ok(series)
    }
}
