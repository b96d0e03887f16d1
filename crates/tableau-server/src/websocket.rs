//! Build notifications pushed to the browser over a websocket.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Wire format of the `/__hmr` socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HmrMessage {
    /// A rebuild succeeded; the page should reload
    Reload,

    /// The last compilation failed; the page keeps its current content
    BuildErrors { errors: Vec<String> },

    Connected,
}

/// Fan-out of build notifications to every open page.
///
/// Remembers whether the latest build failed so a page that connects
/// afterwards still gets the error overlay.
#[derive(Debug, Clone)]
pub struct HmrHub {
    tx: broadcast::Sender<HmrMessage>,
    failure: Arc<Mutex<Option<Vec<String>>>>,
}

impl HmrHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            failure: Arc::default(),
        }
    }

    pub fn broadcast(&self, msg: HmrMessage) {
        match &msg {
            HmrMessage::BuildErrors { errors } => *self.failure() = Some(errors.clone()),
            HmrMessage::Reload => *self.failure() = None,
            HmrMessage::Connected => {}
        }

        if self.tx.send(msg).is_err() {
            tracing::trace!("No HMR clients connected");
        }
    }

    /// What a newly connected page is sent before live messages.
    pub fn greeting(&self) -> Vec<HmrMessage> {
        let mut messages = vec![HmrMessage::Connected];
        if let Some(errors) = self.failure().clone() {
            messages.push(HmrMessage::BuildErrors { errors });
        }
        messages
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HmrMessage> {
        self.tx.subscribe()
    }

    pub fn clients(&self) -> usize {
        self.tx.receiver_count()
    }

    fn failure(&self) -> MutexGuard<'_, Option<Vec<String>>> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for HmrHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Browser side of the socket, served at `/__hmr.js` and injected into HTML
/// pages. Connects back to the serving host, so it works behind any
/// host/port.
pub fn hmr_client_script(socket_path: &str) -> String {
    format!(
        r#"
(() => {{
  const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
  const socket = new WebSocket(scheme + location.host + '{socket_path}');
  let overlay = null;

  const handlers = {{
    connected() {{
      console.debug('[tableau] live reload connected');
    }},
    reload() {{
      location.reload();
    }},
    build_errors({{ errors }}) {{
      if (!overlay) {{
        overlay = document.createElement('pre');
        overlay.id = '__tableau_errors';
        overlay.style.cssText = 'position:fixed;inset:0;margin:0;padding:2rem;z-index:99999;' +
          'background:rgba(24,24,27,0.95);color:#fca5a5;font:14px/1.5 monospace;overflow:auto;white-space:pre-wrap';
        document.body.appendChild(overlay);
      }}
      overlay.textContent = 'Build failed\n\n' + errors.join('\n');
    }},
  }};

  socket.addEventListener('message', (event) => {{
    const message = JSON.parse(event.data);
    const handle = handlers[message.type];
    if (handle) handle(message);
  }});

  socket.addEventListener('close', () => {{
    console.debug('[tableau] live reload lost, reloading');
    setTimeout(() => location.reload(), 1000);
  }});
}})();
"#
    )
}

/// Insert the client script tag before `</body>`, or append it.
pub fn inject_client(html: &str, script_path: &str) -> String {
    let tag = format!("<script src=\"{}\"></script>", script_path);

    match html.rfind("</body>") {
        Some(pos) => format!("{}{}\n{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}\n{}", html, tag),
    }
}
