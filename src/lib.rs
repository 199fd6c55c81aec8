//! A library for crawling shop catalogues with declarative page models.
//!
//! A crawl job is a [`SpiderConfig`]: a site, its seed URLs and the
//! [`PageModel`]s for start, catalogue and detail pages. A [`Spider`] runs one
//! job; a [`Process`] runs the jobs selected for today side by side. Progress
//! is reported as [`Event`]s to the listeners of an [`events::Dispatcher`].

pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod page;
pub mod process;
pub mod spider;
pub mod storage;
pub mod tester;
pub mod urls;

pub use config::{ConcurrencyPolicy, ProcessState, RequestPolicy, SchedulePolicy, SpiderConfig};
pub use events::{Event, EventSender, Listener};
pub use fetch::{Fetcher, HttpClient, ReqwestClient, Response};
pub use page::{Field, Model, PageMetadata, PageModel, Record};
pub use process::{Process, ProcessReport};
pub use spider::{Spider, SpiderReport};
