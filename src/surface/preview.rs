//! In-memory surface that keeps each page's display list

use super::display::{lower_into, DrawOp};
use super::{OutputFile, PageSetup, PageTag, RenderSurface, SurfaceError, SurfaceJob};
use crate::scene::{Rect, Scene, Size};

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPage {
    pub tag: PageTag,
    pub size: Size,
    pub ops: Vec<DrawOp>,
}

impl PreviewPage {
    pub fn texts(&self) -> Vec<&str> {
        self.ops.iter().filter_map(DrawOp::text).collect()
    }
}

/// Collects finished pages. Optionally refuses to open a given page number,
/// standing in for a device that runs out of paper mid-job.
#[derive(Debug, Default)]
pub struct PreviewSurface {
    pages: Vec<PreviewPage>,
    jobs_started: usize,
    jobs_finished: usize,
    jobs_aborted: usize,
    fail_on_page: Option<usize>,
    fail_on_finish: bool,
}

impl PreviewSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_page(page: usize) -> Self {
        Self { fail_on_page: Some(page), ..Self::default() }
    }

    /// Accepts every page but refuses to finalize the job.
    pub fn failing_on_finish() -> Self {
        Self { fail_on_finish: true, ..Self::default() }
    }

    pub fn pages(&self) -> &[PreviewPage] {
        &self.pages
    }

    pub fn jobs_started(&self) -> usize {
        self.jobs_started
    }

    pub fn jobs_finished(&self) -> usize {
        self.jobs_finished
    }

    pub fn jobs_aborted(&self) -> usize {
        self.jobs_aborted
    }
}

impl RenderSurface for PreviewSurface {
    fn name(&self) -> &str {
        "preview"
    }

    fn begin_job<'s>(&'s mut self, setup: &PageSetup) -> Result<Box<dyn SurfaceJob + 's>, SurfaceError> {
        self.jobs_started += 1;
        Ok(Box::new(PreviewJob {
            page_size: setup.page_size,
            surface: self,
            current: None,
        }))
    }
}

struct PreviewJob<'s> {
    surface: &'s mut PreviewSurface,
    page_size: Size,
    current: Option<PreviewPage>,
}

impl SurfaceJob for PreviewJob<'_> {
    fn begin_page(&mut self, tag: PageTag) -> Result<(), SurfaceError> {
        if self.current.is_some() {
            return Err(SurfaceError::State("page already open"));
        }
        if self.surface.fail_on_page == Some(tag.number) {
            return Err(SurfaceError::NewPage(format!("page {} refused", tag.number)));
        }
        self.current = Some(PreviewPage { tag, size: self.page_size, ops: Vec::new() });
        Ok(())
    }

    fn paint(&mut self, scene: &Scene, cell: Rect) -> Result<(), SurfaceError> {
        let page = self.current.as_mut().ok_or(SurfaceError::State("paint outside a page"))?;
        page.ops.extend(lower_into(scene, cell)?);
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), SurfaceError> {
        let page = self.current.take().ok_or(SurfaceError::State("no page open"))?;
        self.surface.pages.push(page);
        Ok(())
    }

    fn end_job(self: Box<Self>) -> Result<Vec<OutputFile>, SurfaceError> {
        if self.current.is_some() {
            return Err(SurfaceError::State("job finished with a page open"));
        }
        if self.surface.fail_on_finish {
            return Err(SurfaceError::Device("job could not be finalized".into()));
        }
        self.surface.jobs_finished += 1;
        Ok(Vec::new())
    }

    fn abort(self: Box<Self>) {
        self.surface.jobs_aborted += 1;
    }
}
