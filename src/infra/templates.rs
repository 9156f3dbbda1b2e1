//! Template integrity checks run once at boot.
//!
//! The front end ships HTML templates the page renderer fills in by element
//! id (pages) or class (cells). A template missing one of those anchors
//! would render broken pages, so boot refuses to continue until they exist.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const TEMPLATE_DIR: &str = "templates";

type Anchors = &'static [&'static str];

const CELL_TEMPLATES: &[(&str, Anchors)] = &[
    (
        "catalogCell",
        &[
            "linkThumb",
            "labelReplies",
            "labelImages",
            "labelPage",
            "labelSubject",
            "divMessage",
            "lockIndicator",
            "pinIndicator",
            "cyclicIndicator",
        ],
    ),
    ("bannerCell", &["bannerImage", "bannerIdentifier"]),
    (
        "opCell",
        &[
            "linkName",
            "panelUploads",
            "labelSubject",
            "labelCreated",
            "divMessage",
            "linkReply",
            "linkSelf",
            "deletionCheckBox",
            "lockIndicator",
            "pinIndicator",
            "labelId",
            "labelRole",
            "divBanMessage",
            "spanId",
            "panelRange",
            "labelRange",
            "cyclicIndicator",
        ],
    ),
    (
        "postCell",
        &[
            "linkName",
            "panelUploads",
            "labelSubject",
            "labelCreated",
            "divMessage",
            "linkSelf",
            "deletionCheckBox",
            "labelId",
            "labelRole",
            "divBanMessage",
            "spanId",
            "panelRange",
            "labelRange",
        ],
    ),
    ("staffCell", &["userIdentifier", "userLabel", "roleCombo"]),
    (
        "volunteerCell",
        &["boardIdentifier", "userIdentifier", "userLabel"],
    ),
    ("reportCell", &["reasonLabel", "link", "idIdentifier"]),
    (
        "closedReportCell",
        &["reasonLabel", "link", "closedByLabel", "closedDateLabel"],
    ),
    (
        "banCell",
        &[
            "reasonLabel",
            "expirationLabel",
            "appliedByLabel",
            "boardLabel",
            "idLabel",
        ],
    ),
    (
        "logCell",
        &[
            "indicatorGlobal",
            "labelUser",
            "labelTime",
            "labelDescription",
            "labelBoard",
            "labelType",
        ],
    ),
    (
        "filterCell",
        &[
            "labelOriginal",
            "labelReplacement",
            "boardIdentifier",
            "filterIdentifier",
        ],
    ),
    (
        "boardsCell",
        &[
            "linkBoard",
            "labelPostsPerHour",
            "labelPostCount",
            "divDescription",
        ],
    ),
    ("rangeBanCell", &["rangeLabel", "idIdentifier"]),
    ("hashBanCell", &["hashLabel", "idIdentifier"]),
    (
        "uploadCell",
        &["infoLabel", "imgLink", "nameLink", "divHash", "labelHash"],
    ),
];

const PAGE_TEMPLATES: &[(&str, Anchors)] = &[
    ("loginPage", &["divCreation"]),
    ("catalogPage", &["divThreads", "labelBoard"]),
    ("resetEmail", &["labelNewPass"]),
    ("bannerManagementPage", &["bannersDiv", "boardIdentifier"]),
    ("errorPage", &["codeLabel", "errorLabel"]),
    ("recoveryEmail", &["linkRecovery"]),
    ("index", &["divBoards"]),
    (
        "boardPage",
        &[
            "labelName",
            "labelDescription",
            "divPostings",
            "divPages",
            "boardIdentifier",
            "linkManagement",
            "bannerImage",
            "captchaDiv",
            "divName",
            "linkModeration",
            "labelMaxFileSize",
        ],
    ),
    (
        "threadPage",
        &[
            "labelName",
            "labelDescription",
            "divPostings",
            "boardIdentifier",
            "linkManagement",
            "threadIdentifier",
            "linkMod",
            "inputBan",
            "divBanInput",
            "divControls",
            "controlBoardIdentifier",
            "controlThreadIdentifier",
            "checkboxLock",
            "checkboxPin",
            "bannerImage",
            "captchaDiv",
            "divName",
            "labelMaxFileSize",
            "checkboxCyclic",
        ],
    ),
    ("messagePage", &["labelMessage", "linkRedirect"]),
    (
        "accountPage",
        &[
            "labelLogin",
            "boardsDiv",
            "emailField",
            "globalManagementLink",
            "boardCreationDiv",
            "checkboxAlwaysSign",
        ],
    ),
    (
        "banPage",
        &["boardLabel", "reasonLabel", "expirationLabel", "idLabel"],
    ),
    (
        "gManagement",
        &[
            "divStaff",
            "userLabel",
            "addStaffForm",
            "newStaffCombo",
            "reportDiv",
            "bansLink",
            "rangeBansLink",
            "hashBansLink",
        ],
    ),
    (
        "bManagement",
        &[
            "volunteersDiv",
            "boardLabel",
            "ownerControlDiv",
            "addVolunteerBoardIdentifier",
            "transferBoardIdentifier",
            "deletionIdentifier",
            "reportDiv",
            "closedReportsLink",
            "bansLink",
            "bannerManagementLink",
            "boardNameField",
            "boardDescriptionField",
            "boardSettingsIdentifier",
            "disableIdsCheckbox",
            "disableCaptchaCheckbox",
            "forceAnonymityCheckbox",
            "filterManagementLink",
            "anonymousNameField",
            "rangeBansLink",
            "hashBansLink",
        ],
    ),
    ("closedReportsPage", &["reportDiv"]),
    ("bansPage", &["bansDiv"]),
    (
        "logsPage",
        &[
            "divLogs",
            "divPages",
            "checkboxExcludeGlobals",
            "fieldBoard",
            "comboboxType",
            "fieldBefore",
            "fieldAfter",
            "fieldUser",
        ],
    ),
    ("previewPage", &["panelContent"]),
    ("filterManagement", &["divFilters", "boardIdentifier"]),
    (
        "boardModerationPage",
        &[
            "boardTransferIdentifier",
            "boardDeletionIdentifier",
            "labelTitle",
            "labelOwner",
        ],
    ),
    ("boardsPage", &["divBoards", "divPages"]),
    (
        "noCookieCaptchaPage",
        &[
            "divSolvedCaptcha",
            "labelCaptchaId",
            "inputCaptchaId",
            "imageCaptcha",
        ],
    ),
    ("rangeBansPage", &["rangeBansDiv", "boardIdentifier"]),
    ("rangeBanPage", &["boardLabel", "rangeLabel"]),
    ("hashBansPage", &["hashBansDiv", "boardIdentifier"]),
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template settings `{path}`: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template settings `{path}` are malformed: {source}")]
    SettingsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("template settings do not name a generic thumbnail")]
    MissingThumb,
}

/// Contents of the front end's template settings file: template name to
/// file name, plus the generic thumbnail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateSettings {
    #[serde(default)]
    pub thumb: String,
    #[serde(flatten)]
    pub templates: BTreeMap<String, String>,
}

impl TemplateSettings {
    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| TemplateError::Settings {
                path: path.to_path_buf(),
                source,
            })?;
        let settings: Self =
            serde_json::from_slice(&raw).map_err(|source| TemplateError::SettingsFormat {
                path: path.to_path_buf(),
                source,
            })?;
        if settings.thumb.trim().is_empty() {
            return Err(TemplateError::MissingThumb);
        }
        Ok(settings)
    }

    pub fn file_for(&self, template: &str) -> Option<&str> {
        self.templates.get(template).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Id,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateIssue {
    Unconfigured { template: String },
    Unreadable { template: String, reason: String },
    Unparsable { template: String, reason: String },
    Missing { template: String, anchor: Anchor, name: String },
    Duplicated { template: String, name: String },
}

impl fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateIssue::Unconfigured { template } => {
                write!(f, "{template}: no file configured")
            }
            TemplateIssue::Unreadable { template, reason } => {
                write!(f, "{template}: could not be read: {reason}")
            }
            TemplateIssue::Unparsable { template, reason } => {
                write!(f, "{template}: could not be parsed: {reason}")
            }
            TemplateIssue::Missing {
                template,
                anchor: Anchor::Id,
                name,
            } => write!(f, "{template}: missing element with id {name}"),
            TemplateIssue::Missing {
                template,
                anchor: Anchor::Class,
                name,
            } => write!(f, "{template}: missing element with class {name}"),
            TemplateIssue::Duplicated { template, name } => {
                write!(f, "{template}: more than one element with class {name}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateReport {
    pub errors: Vec<TemplateIssue>,
    pub warnings: Vec<TemplateIssue>,
    pub checked: usize,
}

impl TemplateReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct ScannedAnchors {
    ids: BTreeSet<String>,
    classes: HashMap<String, usize>,
}

fn scan(html: &str) -> Result<ScannedAnchors, String> {
    let found = Rc::new(RefCell::new(ScannedAnchors::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", {
                let found = Rc::clone(&found);
                move |el| {
                    let mut found = found.borrow_mut();
                    if let Some(id) = el.get_attribute("id") {
                        found.ids.insert(id);
                    }
                    if let Some(classes) = el.get_attribute("class") {
                        for class in classes.split_whitespace() {
                            *found.classes.entry(class.to_string()).or_default() += 1;
                        }
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|err| err.to_string())?;

    Ok(Rc::try_unwrap(found)
        .map(RefCell::into_inner)
        .unwrap_or_else(|shared| std::mem::take(&mut *shared.borrow_mut())))
}

async fn read_template(
    templates_dir: &Path,
    settings: &TemplateSettings,
    template: &str,
    report: &mut TemplateReport,
) -> Option<ScannedAnchors> {
    let Some(file) = settings.file_for(template) else {
        report.errors.push(TemplateIssue::Unconfigured {
            template: template.to_string(),
        });
        return None;
    };

    let html = match tokio::fs::read_to_string(templates_dir.join(file)).await {
        Ok(html) => html,
        Err(err) => {
            report.errors.push(TemplateIssue::Unreadable {
                template: template.to_string(),
                reason: err.to_string(),
            });
            return None;
        }
    };

    report.checked += 1;
    match scan(&html) {
        Ok(anchors) => Some(anchors),
        Err(reason) => {
            report.errors.push(TemplateIssue::Unparsable {
                template: template.to_string(),
                reason,
            });
            None
        }
    }
}

/// Check every known template under `fe_path/templates`.
///
/// Missing anchors are errors; a cell class present more than once is a
/// warning.
pub async fn check_templates(fe_path: &Path, settings: &TemplateSettings) -> TemplateReport {
    let templates_dir = fe_path.join(TEMPLATE_DIR);
    let mut report = TemplateReport::default();

    for (template, classes) in CELL_TEMPLATES {
        let Some(anchors) = read_template(&templates_dir, settings, template, &mut report).await
        else {
            continue;
        };
        for class in *classes {
            match anchors.classes.get(*class).copied().unwrap_or_default() {
                0 => report.errors.push(TemplateIssue::Missing {
                    template: template.to_string(),
                    anchor: Anchor::Class,
                    name: class.to_string(),
                }),
                1 => {}
                _ => report.warnings.push(TemplateIssue::Duplicated {
                    template: template.to_string(),
                    name: class.to_string(),
                }),
            }
        }
    }

    for (template, ids) in PAGE_TEMPLATES {
        let Some(anchors) = read_template(&templates_dir, settings, template, &mut report).await
        else {
            continue;
        };
        for id in *ids {
            if !anchors.ids.contains(*id) {
                report.errors.push(TemplateIssue::Missing {
                    template: template.to_string(),
                    anchor: Anchor::Id,
                    name: id.to_string(),
                });
            }
        }
    }

    if report.is_clean() {
        info!(
            checked = report.checked,
            warnings = report.warnings.len(),
            "Templates passed integrity check"
        );
    } else {
        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Templates failed integrity check"
        );
    }
    report
}

/// Names of every template the checker looks at, cells first.
pub fn known_templates() -> impl Iterator<Item = (&'static str, Anchor, Anchors)> {
    CELL_TEMPLATES
        .iter()
        .map(|(name, anchors)| (*name, Anchor::Class, *anchors))
        .chain(
            PAGE_TEMPLATES
                .iter()
                .map(|(name, anchors)| (*name, Anchor::Id, *anchors)),
        )
}
