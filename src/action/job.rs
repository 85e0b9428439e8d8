// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build job sync.
//!
//! Every dataset of a family with a Jenkins folder gets a pipeline job named
//! after its directory. The job runs the `Jenkinsfile` inside the dataset
//! directory of the family repository.
//!
//! Missing jobs are created. Existing jobs are compared to the rendered
//! template after canonicalization, so formatting differences introduced by
//! Jenkins itself never count as drift. Real drift is shown as a line diff
//! and only overwritten after confirmation.

use crate::action::Action;

use indicatif::ProgressBar;
use inquire::Confirm as Prompt;
use quick_xml::{
    escape::escape,
    events::{BytesStart, Event},
    Reader,
};
use similar::{ChangeTag, TextDiff};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Pipeline job configuration, with `{repo_url}` and `{dataset}` slots.
pub const JOB_TEMPLATE: &str = r#"<?xml version='1.1' encoding='UTF-8'?>
<flow-definition plugin="workflow-job">
  <description>Transformation pipeline for {dataset}</description>
  <keepDependencies>false</keepDependencies>
  <properties/>
  <definition class="org.jenkinsci.plugins.workflow.cps.CpsScmFlowDefinition" plugin="workflow-cps">
    <scm class="hudson.plugins.git.GitSCM" plugin="git">
      <configVersion>2</configVersion>
      <userRemoteConfigs>
        <hudson.plugins.git.UserRemoteConfig>
          <url>{repo_url}</url>
        </hudson.plugins.git.UserRemoteConfig>
      </userRemoteConfigs>
      <branches>
        <hudson.plugins.git.BranchSpec>
          <name>*/master</name>
        </hudson.plugins.git.BranchSpec>
      </branches>
      <doGenerateSubmoduleConfigurations>false</doGenerateSubmoduleConfigurations>
      <submoduleCfg class="list"/>
      <extensions/>
    </scm>
    <scriptPath>datasets/{dataset}/Jenkinsfile</scriptPath>
    <lightweight>true</lightweight>
  </definition>
  <triggers/>
  <disabled>false</disabled>
</flow-definition>
"#;

/// Render the job configuration of a dataset.
pub fn render_job(repo_url: &str, dataset: &str) -> String {
    JOB_TEMPLATE
        .replace("{repo_url}", &escape(repo_url))
        .replace("{dataset}", &escape(dataset))
}

/// Split XML into one line per tag or text node.
///
/// Whitespace around text is dropped and entities are resolved, so
/// `it&apos;s` and `it's` read the same, as do CDATA sections and plain
/// text. Attributes are sorted by name, and `<tag></tag>` becomes
/// `<tag/>`. Comments, processing instructions, and the XML declaration
/// are left out.
///
/// # Errors
///
/// - Return [`JobError::Xml`] if the document is not well-formed.
pub fn canonical_lines(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut lines = Vec::new();
    // Index of the last start tag, while it has no content yet.
    let mut open = None;
    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                open = Some(lines.len());
                lines.push(tag(&start, false)?);
            }
            Event::Empty(start) => {
                open = None;
                lines.push(tag(&start, true)?);
            }
            Event::End(end) => match open.take() {
                Some(index) => {
                    let line: &mut String = &mut lines[index];
                    line.insert(line.len() - 1, '/');
                }
                None => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    lines.push(format!("</{name}>"));
                }
            },
            Event::Text(text) => {
                let text = text.unescape()?;
                if !text.trim().is_empty() {
                    open = None;
                    lines.push(text.trim().to_string());
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data);
                if !text.trim().is_empty() {
                    open = None;
                    lines.push(text.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    Ok(lines)
}

fn tag(start: &BytesStart<'_>, empty: bool) -> Result<String> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        attributes.push((
            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            attribute.unescape_value()?.into_owned(),
        ));
    }
    attributes.sort();

    let mut tag = format!("<{}", String::from_utf8_lossy(start.name().as_ref()));
    for (key, value) in &attributes {
        tag.push_str(&format!(" {key}=\"{}\"", escape(value)));
    }
    tag.push_str(if empty { "/>" } else { ">" });

    Ok(tag)
}

/// Canonical form of an XML document, see [`canonical_lines`].
///
/// # Errors
///
/// - Return [`JobError::Xml`] if the document is not well-formed.
pub fn canonicalize(xml: &str) -> Result<String> {
    Ok(canonical_lines(xml)?.join("\n"))
}

/// Line diff from `old` to `new`.
///
/// Only changed lines are listed, removals prefixed by "- " and additions
/// by "+ ".
pub fn line_diff(old: &[String], new: &[String]) -> Vec<String> {
    let old = old.iter().map(String::as_str).collect::<Vec<_>>();
    let new = new.iter().map(String::as_str).collect::<Vec<_>>();

    TextDiff::from_slices(&old, &new)
        .iter_all_changes()
        .filter_map(|change| match change.tag() {
            ChangeTag::Delete => Some(format!("- {}", change.value())),
            ChangeTag::Insert => Some(format!("+ {}", change.value())),
            ChangeTag::Equal => None,
        })
        .collect()
}

/// Build server access.
///
/// Jobs live in a folder given as a list of folder names from the server
/// root.
#[allow(async_fn_in_trait)]
pub trait JobScheduler {
    /// Fetch the configuration of a job, `None` if the job does not exist.
    async fn job_config(&self, folder: &[String], name: &str) -> Result<Option<String>>;

    async fn create_job(&self, folder: &[String], name: &str, config: &str) -> Result<()>;

    async fn reconfigure_job(&self, folder: &[String], name: &str, config: &str) -> Result<()>;
}

impl<J: JobScheduler> JobScheduler for &J {
    async fn job_config(&self, folder: &[String], name: &str) -> Result<Option<String>> {
        (**self).job_config(folder, name).await
    }

    async fn create_job(&self, folder: &[String], name: &str, config: &str) -> Result<()> {
        (**self).create_job(folder, name, config).await
    }

    async fn reconfigure_job(&self, folder: &[String], name: &str, config: &str) -> Result<()> {
        (**self).reconfigure_job(folder, name, config).await
    }
}

/// Ask the user to confirm something.
pub trait Confirm {
    fn confirm(&self, message: &str) -> bool;
}

/// Confirm every request without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _: &str) -> bool {
        true
    }
}

/// Confirm through an interactive terminal prompt.
///
/// Progress bar output is suspended while the prompt is shown. A prompt that
/// cannot be shown, e.g., without a terminal, counts as "no".
#[derive(Debug, Clone)]
pub struct PromptConfirm {
    bar: ProgressBar,
}

impl PromptConfirm {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Confirm for PromptConfirm {
    fn confirm(&self, message: &str) -> bool {
        self.bar.suspend(|| {
            Prompt::new(message)
                .with_default(false)
                .prompt()
                .unwrap_or_else(|error| {
                    warn!("cannot prompt for confirmation: {error}");
                    false
                })
        })
    }
}

/// Find the clone URL of the "origin" remote of the repository at `path`.
pub fn origin_url(path: impl AsRef<Path>) -> Option<String> {
    let repo = git2::Repository::discover(path.as_ref()).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(str::to_string)
}

/// Sync dataset jobs of one family with its Jenkins folder.
pub struct JobSync<'a, J, C>
where
    J: JobScheduler,
    C: Confirm,
{
    scheduler: &'a J,
    folder: &'a [String],
    repo_url: String,
    writeback: bool,
    confirm: &'a C,
}

impl<'a, J, C> JobSync<'a, J, C>
where
    J: JobScheduler,
    C: Confirm,
{
    /// Construct new job sync.
    pub fn new(
        scheduler: &'a J,
        folder: &'a [String],
        repo_url: impl Into<String>,
        writeback: bool,
        confirm: &'a C,
    ) -> Self {
        Self {
            scheduler,
            folder,
            repo_url: repo_url.into(),
            writeback,
            confirm,
        }
    }

    /// Make sure the job of a dataset exists with the rendered configuration.
    ///
    /// # Errors
    ///
    /// - Return [`JobError`] if any build server call fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn sync(&self, dir: &str) -> Result<Option<Action>> {
        let wanted = render_job(&self.repo_url, dir);

        let Some(current) = self.scheduler.job_config(self.folder, dir).await? else {
            let action = Action::CreateJob {
                name: dir.to_string(),
            };
            if self.writeback {
                self.scheduler.create_job(self.folder, dir, &wanted).await?;
                info!("{action}");
            } else {
                info!("would {action}");
            }
            return Ok(Some(action));
        };

        let current = canonical_lines(&current)?;
        let wanted_lines = canonical_lines(&wanted)?;
        if current == wanted_lines {
            debug!("job {dir:?} is up to date");
            return Ok(None);
        }

        let action = Action::ReconfigureJob {
            name: dir.to_string(),
        };
        info!(
            "job {dir:?} differs from template:\n{}",
            line_diff(&current, &wanted_lines).join("\n")
        );
        if !self.writeback {
            info!("would {action}");
            return Ok(Some(action));
        }

        if !self.confirm.confirm(&format!("Reconfigure job {dir:?}?")) {
            info!("left job {dir:?} unchanged");
            return Ok(None);
        }
        self.scheduler.reconfigure_job(self.folder, dir, &wanted).await?;
        info!("{action}");

        Ok(Some(action))
    }
}

/// Build server error types.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Jenkins request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Job configuration is not well-formed XML.
    #[error("malformed job configuration")]
    Xml(#[from] quick_xml::Error),

    /// Jenkins URL cannot be built.
    #[error("invalid Jenkins URL {url:?}")]
    InvalidUrl { url: String },
}

/// Friendly result alias :3
pub type Result<T, E = JobError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_escapes_substitutions() {
        let config = render_job("https://example.org/a&b.git", "ONS-House-prices");

        assert!(config.contains("<url>https://example.org/a&amp;b.git</url>"));
        assert!(config.contains("<scriptPath>datasets/ONS-House-prices/Jenkinsfile</scriptPath>"));
        assert!(!config.contains("{dataset}"));
    }

    #[test]
    fn canonical_form_ignores_layout() -> anyhow::Result<()> {
        let pretty = indoc! {r#"
            <project>
              <properties />
              <name>
                job
              </name>
            </project>
        "#};
        let dense = r#"<project><properties></properties><name>job</name></project>"#;

        assert_eq!(canonicalize(pretty)?, canonicalize(dense)?);
        assert_eq!(canonicalize(&render_job("u", "d"))?, canonicalize(&render_job("u", "d"))?);

        Ok(())
    }

    #[test]
    fn canonical_form_resolves_markup() -> anyhow::Result<()> {
        let saved = indoc! {r#"
            <?xml version='1.1' encoding='UTF-8'?>
            <job note="a > b" kind="x">
              <!-- saved by Jenkins -->
              <script><![CDATA[echo 'hi']]></script>
              <title>it&apos;s</title>
            </job>
        "#};
        let rendered = r#"<job kind="x" note="a &gt; b"><script>echo &apos;hi&apos;</script><title>it's</title></job>"#;

        assert_eq!(canonicalize(saved)?, canonicalize(rendered)?);
        assert_eq!(
            canonical_lines(rendered)?,
            vec![
                r#"<job kind="x" note="a &gt; b">"#.to_string(),
                "<script>".into(),
                "echo 'hi'".into(),
                "</script>".into(),
                "<title>".into(),
                "it's".into(),
                "</title>".into(),
                "</job>".into(),
            ]
        );

        Ok(())
    }

    #[test]
    fn malformed_configuration_is_an_error() {
        assert!(matches!(canonical_lines("<a><b></a>"), Err(JobError::Xml(_))));
    }

    #[test]
    fn diff_lists_changed_lines() -> anyhow::Result<()> {
        let old = canonical_lines("<a><url>old</url><b/></a>")?;
        let new = canonical_lines("<a><url>new</url><b/><c/></a>")?;

        assert_eq!(
            line_diff(&old, &new),
            vec!["- old".to_string(), "+ new".into(), "+ <c/>".into()]
        );

        Ok(())
    }
}
