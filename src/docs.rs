//! Static documentation page served on `GET /` and `GET /docs`.

use crate::normalize::PERSONA_PREFIX;
use crate::validate::MAX_MESSAGE_CHARS;

const STYLE: &str = r#"
    body { font-family: -apple-system, 'Inter', sans-serif; line-height: 1.6; max-width: 960px; margin: 0 auto; padding: 2rem; color: #1e293b; background: #f8fafc; }
    header { border-bottom: 1px solid #e2e8f0; margin-bottom: 2rem; }
    .endpoint { background: #fff; border: 1px solid #e2e8f0; border-radius: 10px; padding: 1.5rem; margin: 1.5rem 0; }
    .method { display: inline-block; padding: 0.2rem 0.7rem; border-radius: 6px; font-weight: 600; margin-right: 0.5rem; }
    .get { background: #dbeafe; color: #1e40af; }
    .post { background: #dcfce7; color: #166534; }
    pre { background: #1e293b; color: #e2e8f0; padding: 1rem; border-radius: 8px; overflow-x: auto; }
    code { background: #f1f5f9; padding: 0.1rem 0.4rem; border-radius: 4px; }
"#;

/// Render the documentation page. Limits shown on the page come from the
/// running configuration.
pub fn render(version: &str, rate_limit: u32, window_secs: u64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>AF-EVIL-AI relay v{version}</title>
  <style>{STYLE}</style>
</head>
<body>
  <header>
    <h1>AF-EVIL-AI relay <small>v{version}</small></h1>
    <p>Every answer starts with <code>{PERSONA_PREFIX}</code>. Messages are limited to {MAX_MESSAGE_CHARS} characters; each client may send {rate_limit} requests per {window_secs} seconds.</p>
  </header>

  <div class="endpoint">
    <span class="method get">GET</span><code>/chat?msg={{message}}</code>
    <pre>curl "https://relay.example.com/chat?msg=Hello"</pre>
    <p>Response:</p>
    <pre>{{
  "name": "AF-EVIL-AI",
  "response": "{PERSONA_PREFIX} ...",
  "copyright": "..."
}}</pre>
  </div>

  <div class="endpoint">
    <span class="method post">POST</span><code>/api/chat</code>
    <pre>curl -X POST "https://relay.example.com/api/chat" \
  -H "Content-Type: application/json" \
  -d '{{"message": "Hello"}}'</pre>
  </div>

  <div class="endpoint">
    <span class="method post">POST</span><code>/</code>
    <pre>curl -X POST "https://relay.example.com/" \
  -H "Content-Type: application/json" \
  -d '{{
    "model": "NiansuhAI/DeepSeek-R1",
    "messages": [{{"role": "user", "content": "Your message here"}}],
    "max_tokens": 2000,
    "temperature": 0.7
  }}'</pre>
  </div>

  <div class="endpoint">
    <span class="method get">GET</span><code>/health</code>
    <p>Liveness probe returning status, timestamp and version.</p>
  </div>

  <div class="endpoint">
    <h2>Errors</h2>
    <ul>
      <li><code>400</code> invalid JSON, missing fields or a message that is too long</li>
      <li><code>405</code> unsupported method on <code>/api/chat</code></li>
      <li><code>429</code> rate limit exceeded, see the <code>Retry-After</code> header</li>
      <li><code>502</code>/<code>504</code> upstream failure or timeout</li>
      <li><code>500</code> missing upstream credential</li>
    </ul>
  </div>
</body>
</html>
"#
    )
}
