use serde_json::{Map, Value};
use vantage_core::{Config, Cookie, CredentialBundle, DeviceIds, Error, Result, UserIdentity};

use crate::page::BrowserPage;

/// Cookie the target application keys authenticated sessions on.
const SESSION_COOKIE: &str = "sessionid";

/// Capture a credential bundle from a just-logged-in page.
///
/// Cookies are read before any navigation: loading the profile page first
/// can rotate or invalidate a freshly minted session cookie. Identity
/// extraction may come back empty; the bundle is still usable for sampling,
/// it just gets a random session id instead of an identity-keyed one.
pub async fn extract_bundle(page: &dyn BrowserPage, config: &Config) -> Result<CredentialBundle> {
    let raw_cookies = page.cookies(&format!("https://{}/", config.target_host)).await?;
    let cookies: Vec<Cookie> = raw_cookies
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();

    if !cookies.iter().any(|c| c.name == SESSION_COOKIE && !c.value.is_empty()) {
        return Err(Error::Internal("login produced no session cookie".into()));
    }

    page.navigate(&config.profile_url).await?;
    let user = extract_identity(page).await;

    let tokens: Map<String, Value> = cookies
        .iter()
        .filter(|c| config.token_whitelist.iter().any(|t| t == &c.name))
        .map(|c| (c.name.clone(), Value::String(c.value.clone())))
        .collect();

    let device = user.sec_user_id.as_deref().map(DeviceIds::derive);

    Ok(CredentialBundle { cookies, user, tokens, device, extra: Map::new() })
}

/// Pull the user-identity object out of the page's global state.
///
/// Two fallbacks: the well-known global state variable, then the JSON blob
/// embedded for hydration. Both missing yields an empty identity.
async fn extract_identity(page: &dyn BrowserPage) -> UserIdentity {
    match page.evaluate(IDENTITY_SNIPPET).await {
        Ok(value) if value.is_object() => serde_json::from_value(value).unwrap_or_default(),
        Ok(_) => UserIdentity::default(),
        Err(e) => {
            tracing::debug!(error = %e, "identity extraction failed");
            UserIdentity::default()
        }
    }
}

const IDENTITY_SNIPPET: &str = r#"
(() => {
  const shape = (u) => ({
    sec_user_id: u.secUid || null,
    unique_id: u.uniqueId || null,
    nickname: u.nickname || null,
  });
  try {
    const detail = window.SIGI_STATE && window.SIGI_STATE['webapp.user-detail'];
    if (detail && detail.userInfo && detail.userInfo.user) {
      return shape(detail.userInfo.user);
    }
  } catch (e) {}
  try {
    const el = document.getElementById('__UNIVERSAL_DATA_FOR_REHYDRATION__');
    if (el) {
      const scope = JSON.parse(el.textContent).__DEFAULT_SCOPE__ || {};
      const context = scope['webapp.app-context'];
      if (context && context.user) {
        return shape(context.user);
      }
    }
  } catch (e) {}
  return null;
})()
"#;
