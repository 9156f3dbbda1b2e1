//! Executor that fetches fresh records, runs the builders and writes the
//! resulting snapshots to the cache store.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use time::Date;
use tracing::{debug, info, instrument};

use super::plan::{BoardWork, PlanScope, RebuildPlan};
use super::request::{RebuildKey, RebuildRequest, RebuildTarget, TargetKind};
use super::{RebuildError, RebuildExecutor, RebuildOutcome};
use crate::application::builder::public::{self, ThreadPreview};
use crate::application::builder::{BuildError, ViewSnapshot};
use crate::application::repos::{ForumRepository, RepoError};
use crate::application::settings::{BuildSettings, SettingsHandle};
use crate::cache::{ArtifactKind, CacheError, CacheMetadata, CachePath, CacheStore};
use crate::domain::entities::{BoardRecord, PostRecord, ThreadRecord};

const TEMPLATE_DIR: &str = "templates";

/// Where the generic thumbnail comes from and which extension it is served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericThumbSource {
    pub extension: String,
    pub file: PathBuf,
}

impl GenericThumbSource {
    /// Resolve the `thumb` entry of the template settings against the front end.
    pub fn from_template(fe_path: &Path, thumb: &str) -> Self {
        let extension = thumb
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        Self {
            extension,
            file: fe_path.join(TEMPLATE_DIR).join(thumb),
        }
    }
}

/// Number of index pages for `threads` threads.
pub(crate) fn page_count(threads: usize, per_page: u32, max_pages: u32) -> u32 {
    let per_page = per_page.max(1) as usize;
    let pages = threads.div_ceil(per_page).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX).min(max_pages.max(1))
}

pub struct ArtifactGenerator {
    forum: Arc<dyn ForumRepository>,
    store: Arc<dyn CacheStore>,
    settings: Arc<SettingsHandle>,
    thumb: GenericThumbSource,
}

impl ArtifactGenerator {
    pub fn new(
        forum: Arc<dyn ForumRepository>,
        store: Arc<dyn CacheStore>,
        settings: Arc<SettingsHandle>,
        thumb: GenericThumbSource,
    ) -> Self {
        Self {
            forum,
            store,
            settings,
            thumb,
        }
    }

    /// Path the generic thumbnail is served from.
    pub fn generic_thumb_path(&self) -> Result<CachePath, CacheError> {
        CachePath::generic_thumb(&self.thumb.extension)
    }

    async fn write(
        &self,
        key: &RebuildKey,
        snapshot: Result<ViewSnapshot, BuildError>,
    ) -> Result<CachePath, RebuildError> {
        let snapshot = snapshot.map_err(|source| RebuildError::Build {
            key: key.clone(),
            source,
        })?;
        let path = snapshot.path.clone();
        self.store
            .write(snapshot.into_entry())
            .await
            .map_err(|source| RebuildError::Cache {
                key: key.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn write_one(
        &self,
        key: &RebuildKey,
        snapshot: Result<ViewSnapshot, BuildError>,
    ) -> Result<RebuildOutcome, RebuildError> {
        self.write(key, snapshot).await?;
        Ok(RebuildOutcome {
            written: 1,
            deleted: 0,
        })
    }

    async fn delete_where(
        &self,
        key: &RebuildKey,
        predicate: impl Fn(&CachePath, &CacheMetadata) -> bool + Send + Sync,
    ) -> Result<usize, RebuildError> {
        let removed = self
            .store
            .delete_by_tag(&predicate)
            .await
            .map_err(|source| RebuildError::Cache {
                key: key.clone(),
                source,
            })?;
        Ok(removed.len())
    }

    /// Fetch the replies of every thread not already in `loaded`.
    async fn load_posts(
        &self,
        key: &RebuildKey,
        threads: &[ThreadRecord],
        loaded: &mut LoadedPosts,
    ) -> Result<(), RebuildError> {
        for thread in threads {
            let id = (thread.board_uri.clone(), thread.thread_id);
            if loaded.contains_key(&id) {
                continue;
            }
            let posts = self
                .forum
                .thread_posts(&thread.board_uri, thread.thread_id)
                .await
                .map_err(fetch_error(key))?;
            loaded.insert(id, posts);
        }
        Ok(())
    }

    /// Each thread with its last `preview_posts` replies.
    fn previews(
        settings: &BuildSettings,
        threads: &[ThreadRecord],
        loaded: &LoadedPosts,
    ) -> Vec<ThreadPreview> {
        threads
            .iter()
            .map(|thread| {
                let posts = posts_of(loaded, thread);
                let start = posts.len().saturating_sub(settings.general.preview_posts);
                ThreadPreview {
                    thread: thread.clone(),
                    posts: posts[start..].to_vec(),
                }
            })
            .collect()
    }

    async fn front_page(
        &self,
        key: &RebuildKey,
        settings: &BuildSettings,
    ) -> Result<RebuildOutcome, RebuildError> {
        let general = &settings.general;
        let top_boards = self
            .forum
            .top_boards(general.top_boards_count)
            .await
            .map_err(fetch_error(key))?;
        let latest_posts = self
            .forum
            .latest_posts(general.latest_posts_count)
            .await
            .map_err(fetch_error(key))?;
        let latest_images = self
            .forum
            .latest_images(general.latest_images_count)
            .await
            .map_err(fetch_error(key))?;
        let stats = self.forum.global_stats().await.map_err(fetch_error(key))?;

        self.write_one(
            key,
            public::front_page(settings, &top_boards, &latest_posts, &latest_images, &stats),
        )
        .await
    }

    #[instrument(skip(self, key, settings, work), fields(board = %work.uri))]
    async fn board(
        &self,
        key: &RebuildKey,
        settings: &BuildSettings,
        work: &BoardWork,
    ) -> Result<RebuildOutcome, RebuildError> {
        let uri = work.uri.as_str();
        let Some(board) = self.forum.find_board(uri).await.map_err(fetch_error(key))? else {
            let deleted = self
                .delete_where(key, |_, metadata| metadata.tagged_with_board(uri))
                .await?;
            info!(deleted, "Board no longer exists; dropped its artifacts");
            return Ok(RebuildOutcome {
                written: 0,
                deleted,
            });
        };

        let threads = self.forum.list_threads(uri).await.map_err(fetch_error(key))?;
        let general = &settings.general;
        let per_page = general.threads_per_page.get();
        let pages_total = page_count(threads.len(), per_page, general.max_pages.get());
        let visible_len = threads.len().min(pages_total as usize * per_page as usize);
        let visible = &threads[..visible_len];

        let mut written: BTreeSet<CachePath> = BTreeSet::new();
        let mut deleted = 0;
        let mut loaded = LoadedPosts::new();

        let mut pages: BTreeSet<u32> = work
            .pages
            .iter()
            .copied()
            .filter(|page| (1..=pages_total).contains(page))
            .collect();
        if work.index || work.build_all {
            pages.extend(1..=pages_total);
        }

        for page in pages {
            let start = ((page - 1) as usize * per_page as usize).min(visible.len());
            let end = (start + per_page as usize).min(visible.len());
            let slice = &visible[start..end];
            self.load_posts(key, slice, &mut loaded).await?;
            let previews = Self::previews(settings, slice, &loaded);

            written.insert(
                self.write(
                    key,
                    public::board_page(settings, &board, page, pages_total, &previews),
                )
                .await?,
            );
        }

        if work.index && !work.build_all {
            deleted += self
                .delete_where(key, |_, metadata| {
                    metadata.tagged_with_board(uri)
                        && metadata.kind == ArtifactKind::Page
                        && metadata.page.is_some_and(|page| page > pages_total)
                })
                .await?;
        }

        if work.catalog || work.index || work.build_all {
            written.insert(self.write(key, public::catalog(settings, uri, visible)).await?);
        }

        let targets: Vec<ThreadRecord> = if work.build_all {
            threads.clone()
        } else {
            threads
                .iter()
                .filter(|thread| work.threads.contains(&thread.thread_id))
                .cloned()
                .collect()
        };
        self.load_posts(key, &targets, &mut loaded).await?;
        for thread in &targets {
            let posts = posts_of(&loaded, thread);
            written.insert(
                self.write(key, public::thread_page(settings, &board, thread, posts))
                    .await?,
            );
        }

        if !work.build_all {
            let gone: BTreeSet<u64> = work
                .threads
                .iter()
                .copied()
                .filter(|id| !threads.iter().any(|thread| thread.thread_id == *id))
                .collect();
            if !gone.is_empty() {
                deleted += self
                    .delete_where(key, |_, metadata| {
                        metadata.tagged_with_board(uri)
                            && metadata.kind == ArtifactKind::Thread
                            && metadata.thread_id.is_some_and(|id| gone.contains(&id))
                    })
                    .await?;
            }
        }

        if work.rules || work.build_all {
            written.insert(self.write(key, public::rules(uri, &board.rules)).await?);
        }

        if work.build_all {
            deleted += self
                .delete_where(key, |path, metadata| {
                    metadata.tagged_with_board(uri) && !written.contains(path)
                })
                .await?;
        }

        debug!(
            written = written.len(),
            deleted,
            pages = pages_total,
            "Board artifacts rebuilt"
        );
        Ok(RebuildOutcome {
            written: written.len(),
            deleted,
        })
    }

    /// Most recently bumped threads across `boards`, with previews.
    async fn latest_threads(
        &self,
        key: &RebuildKey,
        settings: &BuildSettings,
        boards: &[String],
    ) -> Result<Vec<ThreadPreview>, RebuildError> {
        let mut threads = Vec::new();
        for uri in boards {
            threads.extend(self.forum.list_threads(uri).await.map_err(fetch_error(key))?);
        }
        threads.sort_by(|a, b| {
            b.last_bump
                .cmp(&a.last_bump)
                .then_with(|| a.board_uri.cmp(&b.board_uri))
                .then_with(|| a.thread_id.cmp(&b.thread_id))
        });
        threads.truncate(settings.general.threads_per_page.get() as usize);

        let mut loaded = LoadedPosts::new();
        self.load_posts(key, &threads, &mut loaded).await?;

        Ok(Self::previews(settings, &threads, &loaded))
    }

    async fn overboard(
        &self,
        key: &RebuildKey,
        settings: &BuildSettings,
        sfw: bool,
    ) -> Result<RebuildOutcome, RebuildError> {
        let configured = if sfw {
            settings.general.sfw_overboard.as_deref()
        } else {
            settings.general.overboard.as_deref()
        };
        let Some(uri) = configured else {
            debug!(sfw, "Overboard not configured; nothing to build");
            return Ok(RebuildOutcome::default());
        };

        let boards: Vec<String> = self
            .forum
            .list_boards()
            .await
            .map_err(fetch_error(key))?
            .into_iter()
            .filter(|board| !sfw || board.has_special_setting("sfw"))
            .map(|board| board.board_uri)
            .collect();

        let previews = self.latest_threads(key, settings, &boards).await?;
        self.write_one(key, public::overboard(uri, &previews)).await
    }

    async fn multiboard(
        &self,
        key: &RebuildKey,
        settings: &BuildSettings,
        boards: &[String],
    ) -> Result<RebuildOutcome, RebuildError> {
        let previews = self.latest_threads(key, settings, boards).await?;
        self.write_one(key, public::multiboard(boards, &previews)).await
    }

    async fn log(&self, key: &RebuildKey, date: Date) -> Result<RebuildOutcome, RebuildError> {
        let entries = self
            .forum
            .logs_for_date(date)
            .await
            .map_err(fetch_error(key))?;
        self.write_one(key, public::log(date, &entries)).await
    }

    async fn generic_thumb(&self, key: &RebuildKey) -> Result<RebuildOutcome, RebuildError> {
        let bytes = tokio::fs::read(&self.thumb.file)
            .await
            .map_err(RebuildError::Thumb)?;
        self.write_one(
            key,
            public::generic_thumb(&self.thumb.extension, Bytes::from(bytes)),
        )
        .await
    }
}

/// Replies fetched during one execution, by board and thread.
type LoadedPosts = HashMap<(String, u64), Vec<PostRecord>>;

fn posts_of<'a>(loaded: &'a LoadedPosts, thread: &ThreadRecord) -> &'a [PostRecord] {
    loaded
        .get(&(thread.board_uri.clone(), thread.thread_id))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn fetch_error(key: &RebuildKey) -> impl FnOnce(RepoError) -> RebuildError + '_ {
    move |source| RebuildError::Fetch {
        key: key.clone(),
        source,
    }
}

#[async_trait]
impl RebuildExecutor for ArtifactGenerator {
    async fn execute(&self, plan: &RebuildPlan) -> Result<RebuildOutcome, RebuildError> {
        let settings = self.settings.current();
        let key = &plan.key;

        match &plan.scope {
            PlanScope::FrontPage => self.front_page(key, &settings).await,
            PlanScope::Board(work) => self.board(key, &settings, work).await,
            PlanScope::Overboard { sfw } => self.overboard(key, &settings, *sfw).await,
            PlanScope::Multiboard { boards } => self.multiboard(key, &settings, boards).await,
            PlanScope::Log { date } => self.log(key, *date).await,
            PlanScope::NotFound => self.write_one(key, public::not_found(&settings)).await,
            PlanScope::Login => self.write_one(key, public::login(&settings)).await,
            PlanScope::GenericThumb => self.generic_thumb(key).await,
            PlanScope::All => {
                debug!("Full rebuild plans are expanded by the queue");
                Ok(RebuildOutcome::default())
            }
        }
    }

    async fn expand_all(&self) -> Result<Vec<RebuildRequest>, RebuildError> {
        let key = RebuildKey::global(TargetKind::All);
        let settings = self.settings.current();

        let mut requests = vec![
            RebuildRequest::new(RebuildTarget::FrontPage),
            RebuildRequest::new(RebuildTarget::NotFound),
            RebuildRequest::new(RebuildTarget::Login),
            RebuildRequest::new(RebuildTarget::GenericThumb),
        ];

        let boards: Vec<BoardRecord> = self.forum.list_boards().await.map_err(fetch_error(&key))?;
        requests.extend(
            boards
                .into_iter()
                .map(|board| RebuildRequest::board_all(board.board_uri)),
        );

        if settings.general.overboard.is_some() {
            requests.push(RebuildRequest::new(RebuildTarget::Overboard { sfw: false }));
        }
        if settings.general.sfw_overboard.is_some() {
            requests.push(RebuildRequest::new(RebuildTarget::Overboard { sfw: true }));
        }

        let dates = self.forum.log_dates().await.map_err(fetch_error(&key))?;
        requests.extend(
            dates
                .into_iter()
                .map(|date| RebuildRequest::new(RebuildTarget::Log { date })),
        );

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn page_count_is_bounded() {
        assert_eq!(page_count(0, 10, 16), 1);
        assert_eq!(page_count(10, 10, 16), 1);
        assert_eq!(page_count(11, 10, 16), 2);
        assert_eq!(page_count(1000, 10, 16), 16);
    }

    #[test]
    fn thumb_extension_comes_from_template_name() {
        let source = GenericThumbSource::from_template(Path::new("/fe"), "genericThumb.PNG");
        assert_eq!(source.extension, "png");
        assert_eq!(source.file, Path::new("/fe/templates/genericThumb.PNG"));
    }
}
