//! HTML pages for the browser side of the flow

use url::form_urlencoded;

use super::provider::FederatedProvider;

const PAGE_STYLE: &str = r"
        body {
            font-family: ui-sans-serif, system-ui, -apple-system, 'Segoe UI', sans-serif;
            background-color: #f9fafb;
            display: flex;
            flex-direction: column;
            align-items: center;
            justify-content: center;
            height: 100vh;
            margin: 0;
        }
        .card {
            background: #fff;
            padding: 2rem 2.5rem;
            border-radius: 8px;
            box-shadow: 0 8px 36px 8px rgba(0, 0, 0, 0.06);
            max-width: 400px;
            width: 100%;
        }
        h1 { font-size: 1.25rem; margin: 0 0 2rem 0; }
        label { display: block; margin-bottom: 0.25rem; font-weight: 500; }
        input[type=email], input[type=password] {
            width: calc(100% - 2rem);
            padding: 0.5rem 1rem;
            margin-bottom: 1rem;
            border: 1px solid #d1d5db;
            border-radius: 6px;
            font-size: 1rem;
        }
        button {
            width: 100%;
            padding: 0.5rem 0.75rem;
            background: #f97316;
            color: #fff;
            border: none;
            border-radius: 6px;
            font-size: 1rem;
            cursor: pointer;
        }
        .divider { margin: 1.5rem 0; text-align: center; color: #6b7280; font-size: 0.875rem; }
        .social { display: flex; gap: 10px; }
        .social a {
            flex: 1;
            padding: 10px 5px;
            border: 1px solid #d1d5db;
            border-radius: 6px;
            color: black;
            text-align: center;
            text-decoration: none;
        }
";

/// Credential-entry form. The anti-forgery token goes into a hidden field
/// and onto each federated-login link.
#[must_use]
pub fn login_form(state: &str) -> String {
    let hidden_state = escape_html(state);
    let query_state: String = form_urlencoded::byte_serialize(state.as_bytes()).collect();

    let links: String = FederatedProvider::ALL
        .iter()
        .map(|provider| {
            format!(
                r#"<a href="/oauth/{provider}?state={query_state}" class="{provider}">Continue with {provider}</a>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n                ");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sign in</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <form class="card" method="POST" action="/authorize">
        <h1>Sign in to account</h1>
        <label for="email">Email</label>
        <input id="email" name="email" type="email" required />
        <label for="password">Password</label>
        <input id="password" name="password" type="password" required />
        <input type="hidden" name="state" value="{hidden_state}" />
        <button type="submit">Sign in to account</button>
        <div class="divider"><span>Or continue with</span></div>
        <div class="social">
                {links}
        </div>
    </form>
</body>
</html>"#
    )
}

/// Error dialog with a back button
#[must_use]
pub fn error_dialog(message: &str) -> String {
    let message = escape_html(message);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8" />
    <title>Authorization Failed</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="card">
        <h1>An error has occurred</h1>
        <p style="color: #4B5563;">{message}</p>
        <button onclick="window.history.back()">Back</button>
    </div>
</body>
</html>"#
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
