use quarry_logger::debug;

/// Handle of the browser shared across a fan-out.
///
/// Constructed before scheduling starts and closed after the operator
/// returns. The browser runtime itself is an external collaborator; this
/// handle only owns the endpoint every child run connects to.
#[derive(Debug, Clone)]
pub struct ManagedBrowser {
    ws_endpoint: Option<String>,
}

impl ManagedBrowser {
    /// Wraps a caller-provided endpoint; `None` means every executor
    /// launches its own browser.
    pub fn new(ws_endpoint: Option<String>) -> Self {
        ManagedBrowser { ws_endpoint }
    }

    pub fn ws_endpoint(&self) -> Option<&str> {
        self.ws_endpoint.as_deref()
    }

    /// Releases the handle. The endpoint owner shuts the browser down.
    pub fn close(self) {
        if let Some(endpoint) = &self.ws_endpoint {
            debug!("releasing shared browser endpoint {endpoint}");
        }
    }
}
