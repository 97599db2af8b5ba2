//! Session acquisition: CAPTCHA fetch, cookie seeding, and escalation.

use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::header::SET_COOKIE;
use reqwest::redirect::Policy;
use reqwest::Url;

use crate::config::{Endpoints, RegistryConfig};
use crate::solver::CaptchaSolver;
use crate::types::{RegistryError, RegistryResult};

/// Extra challenges fetched when the first one yields no candidate.
pub const ESCALATION_CHALLENGES: usize = 5;

/// A CAPTCHA image plus the cookies the registry issued with it.
#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    pub image: Vec<u8>,
    pub cookies: Vec<String>,
}

/// Authenticated scraping session for one search workflow.
///
/// Owns the client bound to its cookie store. Deliberately not
/// `Clone`: a handle is consumed by exactly one workflow.
pub struct SessionHandle {
    client: reqwest::Client,
    captcha: String,
}

impl SessionHandle {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Solved CAPTCHA text, submitted as the form's control number.
    pub fn captcha(&self) -> &str {
        &self.captcha
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("captcha", &self.captcha)
            .finish_non_exhaustive()
    }
}

/// Produces [`SessionHandle`]s by solving the registry's CAPTCHA.
#[derive(Clone)]
pub struct SessionAcquirer {
    endpoints: Endpoints,
    config: Arc<RegistryConfig>,
    solver: CaptchaSolver,
    bootstrap: reqwest::Client,
}

impl SessionAcquirer {
    pub fn new(config: Arc<RegistryConfig>, solver: CaptchaSolver) -> RegistryResult<Self> {
        let bootstrap = client_builder(&config).build()?;
        Ok(Self {
            endpoints: config.endpoints(),
            config,
            solver,
            bootstrap,
        })
    }

    /// Obtain a session whose latest CAPTCHA has a plausible solution.
    ///
    /// The solution is not verified here; the registry's reaction to the
    /// search submission is the only check.
    pub async fn acquire(&self) -> RegistryResult<SessionHandle> {
        let captcha_url = self.endpoints.captcha();
        let challenge = fetch_challenge(&self.bootstrap, &captcha_url).await?;

        let url = Url::parse(&captcha_url)
            .map_err(|e| RegistryError::UpstreamUnavailable(format!("bad captcha url: {e}")))?;
        let jar = Arc::new(Jar::default());
        for cookie in &challenge.cookies {
            jar.add_cookie_str(cookie, &url);
        }
        tracing::debug!("Seeded session with {} cookie(s)", challenge.cookies.len());

        let client = client_builder(&self.config)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        let mut captcha = self.solver.solve(&[challenge.image]).await;

        if captcha.is_empty() {
            tracing::warn!(
                "CAPTCHA unsolved on first try, fetching {ESCALATION_CHALLENGES} more"
            );
            // Sequential on purpose: the registry binds only the latest
            // challenge to the session.
            let mut images = Vec::with_capacity(ESCALATION_CHALLENGES);
            for _ in 0..ESCALATION_CHALLENGES {
                images.push(fetch_challenge(&client, &captcha_url).await?.image);
            }
            captcha = self.solver.solve(&images).await;
        }

        if captcha.is_empty() {
            return Err(RegistryError::NoSession("captcha unsolved".to_string()));
        }

        tracing::info!("Registry session established");
        Ok(SessionHandle {
            client,
            captcha,
        })
    }
}

/// Client settings shared by the bootstrap and session clients.
///
/// Redirects are never followed: a 303 is how the registry reports a dead
/// session.
fn client_builder(config: &RegistryConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.as_str())
        .redirect(Policy::none())
}

async fn fetch_challenge(client: &reqwest::Client, url: &str) -> RegistryResult<CaptchaChallenge> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RegistryError::UpstreamUnavailable(format!(
            "captcha endpoint answered {status}"
        )));
    }

    let cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .collect();

    let image = response.bytes().await?.to_vec();
    if image::guess_format(&image).is_err() {
        return Err(RegistryError::UpstreamUnavailable(
            "captcha endpoint returned a non-image payload".to_string(),
        ));
    }

    Ok(CaptchaChallenge { image, cookies })
}
