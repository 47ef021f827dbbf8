//! Consent screen rendering.
//!
//! Server-rendered HTML with manual escaping: every interpolated
//! user-controlled string (client id, scope names come from our own catalog
//! but are escaped anyway) goes through [`escape_html`]. The form
//! double-submits a CSRF token (hidden field + HttpOnly cookie) and carries
//! the parsed authorization request as an opaque base64-JSON blob.
//!
//! The checkbox-disable script at the cap is UX only — the server truncates
//! the submitted list regardless.

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;

use crate::error::OAuthError;
use crate::oauth::AuthorizationRequest;

/// Escape `& < > " '` for safe HTML interpolation.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Encode the authorization request into the consent form's opaque blob.
pub fn encode_consent_state(request: &AuthorizationRequest) -> String {
    let json = serde_json::to_string(request).unwrap_or_default();
    BASE64_STD.encode(json.as_bytes())
}

/// Decode and validate the consent form's opaque blob.
pub fn decode_consent_state(raw: &str) -> Result<AuthorizationRequest, OAuthError> {
    let bytes = BASE64_STD
        .decode(raw.trim())
        .map_err(|_| OAuthError::invalid_request("consent state is not valid base64"))?;
    let request: AuthorizationRequest = serde_json::from_slice(&bytes)
        .map_err(|_| OAuthError::invalid_request("consent state is not valid JSON"))?;
    if request.client_id.trim().is_empty() {
        return Err(OAuthError::invalid_request("consent state has no client_id"));
    }
    Ok(request)
}

const PAGE_STYLE: &str = r#"
    body { font-family: -apple-system, system-ui, sans-serif; background: #0b1021; color: #e6e8f0;
           display: flex; justify-content: center; padding: 3rem 1rem; }
    .card { background: #151b33; border: 1px solid #2a3352; border-radius: 12px;
            max-width: 34rem; width: 100%; padding: 2rem; }
    h1 { font-size: 1.25rem; margin-top: 0; }
    .client { color: #8ab4ff; }
    fieldset { border: 1px solid #2a3352; border-radius: 8px; margin: 1rem 0; padding: 0.75rem 1rem; }
    legend { padding: 0 0.4rem; color: #9aa3c0; font-size: 0.85rem; }
    label { display: block; margin: 0.4rem 0; cursor: pointer; }
    .desc { color: #9aa3c0; font-size: 0.85rem; margin-left: 1.55rem; }
    details { margin: 1rem 0; }
    summary { cursor: pointer; color: #9aa3c0; }
    .cap-note { color: #9aa3c0; font-size: 0.8rem; }
    .actions { display: flex; gap: 0.75rem; margin-top: 1.5rem; }
    button { border: 0; border-radius: 8px; padding: 0.6rem 1.4rem; font-size: 1rem; cursor: pointer; }
    .approve { background: #3b82f6; color: white; }
    .deny { background: #2a3352; color: #e6e8f0; }
    .error { color: #f87171; }
"#;

/// Render the consent dialog for an authorization request.
///
/// `csrf_token` must also be set as the CSRF cookie by the caller.
pub fn render_consent_page(request: &AuthorizationRequest, csrf_token: &str) -> String {
    let client = escape_html(&request.client_id);
    let state_blob = encode_consent_state(request);
    let csrf = escape_html(csrf_token);
    let cap = strato_scopes::MAX_SCOPES;

    let mut templates_html = String::new();
    for template in strato_scopes::TEMPLATES {
        let checked = if template.default { " checked" } else { "" };
        templates_html.push_str(&format!(
            r#"<label><input type="radio" name="template" value="{name}"{checked}> {name}
               <div class="desc">{desc}</div></label>"#,
            name = escape_html(template.name),
            desc = escape_html(template.description),
        ));
    }

    let mut scopes_html = String::new();
    for (category, scopes) in strato_scopes::grouped_by_category() {
        scopes_html.push_str(&format!(
            "<fieldset><legend>{}</legend>",
            escape_html(category)
        ));
        for scope in scopes {
            scopes_html.push_str(&format!(
                r#"<label><input type="checkbox" name="scopes" value="{name}"> {name}
                   <div class="desc">{desc}</div></label>"#,
                name = escape_html(scope.name),
                desc = escape_html(scope.description),
            ));
        }
        scopes_html.push_str("</fieldset>");
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Authorize {client}</title>
<style>{PAGE_STYLE}</style>
</head>
<body>
<div class="card">
<h1><span class="client">{client}</span> wants access to your account</h1>
<p>Pick a permission preset, or open the advanced panel to choose individual
scopes. Checked scopes override the preset.</p>
<form method="post" action="/authorize">
<input type="hidden" name="csrf_token" value="{csrf}">
<input type="hidden" name="state" value="{state_blob}">
<fieldset><legend>Presets</legend>
{templates_html}
</fieldset>
<details>
<summary>Advanced: choose individual scopes</summary>
<p class="cap-note">At most {cap} scopes per authorization — further boxes
are disabled once the limit is reached.</p>
{scopes_html}
</details>
<div class="actions">
<button class="approve" type="submit" name="decision" value="approve">Approve</button>
<button class="deny" type="submit" name="decision" value="deny">Deny</button>
</div>
</form>
</div>
<script>
(() => {{
  const cap = {cap};
  const boxes = Array.from(document.querySelectorAll('input[name="scopes"]'));
  const sync = () => {{
    const checked = boxes.filter(b => b.checked).length;
    boxes.forEach(b => {{ if (!b.checked) b.disabled = checked >= cap; }});
  }};
  boxes.forEach(b => b.addEventListener('change', sync));
}})();
</script>
</body>
</html>"#
    )
}

/// Render a themed OAuth error page.
///
/// Internal detail never reaches the browser — `server_error` descriptions
/// are replaced with a generic message upstream of this call.
pub fn render_error_page(error: &OAuthError) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Authorization failed</title>
<style>{PAGE_STYLE}</style>
</head>
<body>
<div class="card">
<h1 class="error">Authorization failed</h1>
<p><code>{code}</code></p>
<p>{description}</p>
</div>
</body>
</html>"#,
        code = escape_html(error.kind.code()),
        description = escape_html(error.public_description()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: "code".into(),
            client_id: "client-1".into(),
            redirect_uri: "https://app.example/cb".into(),
            scope: vec![],
            state: "caller-state".into(),
        }
    }

    #[test]
    fn escapes_all_dangerous_characters() {
        assert_eq!(
            escape_html(r#"<script>alert("x&y')</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn consent_state_roundtrip() {
        let blob = encode_consent_state(&request());
        let back = decode_consent_state(&blob).unwrap();
        assert_eq!(back, request());
    }

    #[test]
    fn consent_state_rejects_missing_client() {
        let mut req = request();
        req.client_id = " ".into();
        let blob = encode_consent_state(&req);
        assert!(decode_consent_state(&blob).is_err());
        assert!(decode_consent_state("not base64 at all!").is_err());
    }

    #[test]
    fn consent_page_escapes_the_client_id() {
        let mut req = request();
        req.client_id = "<img src=x onerror=alert(1)>".into();
        let html = render_consent_page(&req, "csrf-tok");
        assert!(!html.contains("<img src=x"));
        assert!(html.contains("&lt;img src=x"));
    }

    #[test]
    fn consent_page_carries_csrf_and_state() {
        let html = render_consent_page(&request(), "csrf-tok");
        assert!(html.contains(r#"name="csrf_token" value="csrf-tok""#));
        assert!(html.contains(r#"name="state""#));
        // Every template renders as a radio option, exactly one preselected
        for template in strato_scopes::TEMPLATES {
            assert!(html.contains(&format!(r#"value="{}""#, template.name)));
        }
        assert_eq!(html.matches("checked>").count(), 1);
    }

    #[test]
    fn consent_page_lists_every_catalog_scope() {
        let html = render_consent_page(&request(), "t");
        for scope in strato_scopes::CATALOG {
            assert!(
                html.contains(&format!(r#"value="{}""#, scope.name)),
                "missing scope checkbox for {}",
                scope.name
            );
        }
    }

    #[test]
    fn error_page_masks_server_detail() {
        let err = OAuthError::server_error("kv corruption in pending state");
        let html = render_error_page(&err);
        assert!(html.contains("server_error"));
        assert!(!html.contains("kv corruption"));
    }
}
