use crate::bot::flow::Flow;

pub struct AppContext {
  flow: Flow,
}

impl AppContext {
  pub fn new(flow: Flow) -> Self {
    Self { flow }
  }

  pub fn flow(&self) -> &Flow {
    &self.flow
  }
}
