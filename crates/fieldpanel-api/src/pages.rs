//! HTML pages served to the browser.

use std::path::Path;

use axum::{
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::state::AppState;

const FALLBACK_LOGIN: &str = r#"<!DOCTYPE html>
<html>
<head><title>FieldPanel - Login</title></head>
<body>
<h1>Aquatic Mapping Control Panel</h1>
<form id="login">
  <input name="username" placeholder="Username" autocomplete="username">
  <input name="password" type="password" placeholder="Password" autocomplete="current-password">
  <button type="submit">Sign in</button>
</form>
<p id="error"></p>
<script>
document.getElementById('login').addEventListener('submit', async (e) => {
  e.preventDefault();
  const form = new FormData(e.target);
  const body = {username: form.get('username'), password: form.get('password')};
  const resp = await fetch('/api/login', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body)
  });
  if (resp.ok) {
    sessionStorage.setItem('auth', btoa(body.username + ':' + body.password));
    window.location = '/dashboard';
  } else {
    document.getElementById('error').textContent = 'Invalid credentials';
  }
});
</script>
</body>
</html>
"#;

const FALLBACK_DASHBOARD: &str = r#"<!DOCTYPE html>
<html>
<head><title>FieldPanel - Dashboard</title></head>
<body>
<h1>Aquatic Mapping Control Panel</h1>
<p>Dashboard templates are not installed. The REST API is available under <code>/api</code>.</p>
<pre id="status"></pre>
<script>
const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '/ws');
ws.onmessage = (msg) => { document.getElementById('status').textContent = msg.data; };
</script>
</body>
</html>
"#;

/// Read a template and fill the only placeholder it uses.
async fn render_template(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => Some(body.replace("{{ username }}", "user")),
        Err(e) => {
            debug!("Template {:?} unavailable: {}", path, e);
            None
        }
    }
}

pub async fn landing(State(state): State<AppState>) -> Response {
    if let Some(page) = &state.settings.server.landing_page {
        if let Ok(body) = tokio::fs::read_to_string(page).await {
            return Html(body).into_response();
        }
    }
    Redirect::temporary("/login").into_response()
}

pub async fn login_page(State(state): State<AppState>) -> Html<String> {
    let path = state.settings.frontend_dir().join("templates").join("login.html");
    Html(
        render_template(&path)
            .await
            .unwrap_or_else(|| FALLBACK_LOGIN.to_string()),
    )
}

pub async fn dashboard_page(State(state): State<AppState>) -> Html<String> {
    let path = state
        .settings
        .frontend_dir()
        .join("templates")
        .join("dashboard.html");
    Html(
        render_template(&path)
            .await
            .unwrap_or_else(|| FALLBACK_DASHBOARD.to_string()),
    )
}
