use std::collections::HashMap;
use std::path::Path;

use flowlab_task_runtime::{Inputs, ProviderError, TemplateRef};
use flowlab_workflow::expr;

/// Template bodies keyed by id, optionally versioned as `id@version`.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
  templates: HashMap<String, String>,
}

impl TemplateLibrary {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, id: impl Into<String>, body: impl Into<String>) {
    self.templates.insert(id.into(), body.into());
  }

  pub fn with(mut self, id: impl Into<String>, body: impl Into<String>) -> Self {
    self.insert(id, body);
    self
  }

  /// Load every regular file in `dir`; the file stem becomes the template id.
  ///
  /// `summarize@2.j2` registers as `summarize@2`.
  pub fn load_dir(dir: &Path) -> std::io::Result<Self> {
    let mut library = Self::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      if !path.is_file() {
        continue;
      }
      let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
        continue;
      };
      let body = std::fs::read_to_string(&path)?;
      library.insert(id, body);
    }
    Ok(library)
  }

  pub fn len(&self) -> usize {
    self.templates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.templates.is_empty()
  }

  /// Find the body for a reference.
  ///
  /// An inline body wins. Otherwise `id@version` is tried before `id`.
  pub fn resolve<'a>(&'a self, template: &'a TemplateRef) -> Result<&'a str, ProviderError> {
    if let Some(body) = &template.body {
      return Ok(body);
    }
    let Some(id) = &template.template_id else {
      return Err(ProviderError::TemplateNotFound(template.label().to_string()));
    };
    if let Some(version) = &template.version {
      if let Some(body) = self.templates.get(&format!("{}@{}", id, version)) {
        return Ok(body);
      }
    }
    self
      .templates
      .get(id)
      .map(String::as_str)
      .ok_or_else(|| ProviderError::TemplateNotFound(id.clone()))
  }

  /// Resolve and render a template against the request variables.
  pub fn render(&self, template: &TemplateRef, variables: &Inputs) -> Result<String, ProviderError> {
    let body = self.resolve(template)?;
    expr::render_str(body, &serde_json::Value::Object(variables.clone())).map_err(|e| {
      ProviderError::Render {
        message: e.to_string(),
      }
    })
  }
}
