//! Where the reflectors of a panel are computed.

use super::workers::PanelWorkers;
use crate::blas;
use crate::comm::CommunicatorPipeline;
use crate::matrix::{Distribution, Matrix, Panel, Resource, SubPanelView, WriteTile};
use crate::runtime::{Priority, RoundRobin, Task, TaskGraph, TaskId};
use crate::tune::{PanelStrategy, red2band_panel_num_workers};
use crate::types::{Coord, Scalar};
use std::sync::Arc;
use std::time::Duration;

/// Ranks sharing a panel, for the distributed reduction.
#[derive(Clone)]
pub(crate) struct PanelCollective {
    /// Whether this rank holds the first tile of the panel (the pivots).
    pub(crate) rank_has_head: bool,
    /// Column communicator reserved for the blocking reductions of the panel workers.
    pub(crate) chain: CommunicatorPipeline,
    /// Task the panel computation must wait for.
    pub(crate) trigger: Option<TaskId>,
}

pub(crate) struct PanelContext {
    pub(crate) max_workers: usize,
    pub(crate) busy_wait: Duration,
    pub(crate) collective: Option<PanelCollective>,
}

pub(crate) trait PanelComputeStrategy<T: Scalar> {
    /// Schedules the computation of the reflectors of the panel `view` of `mat_a`, with
    /// their `tau` factors stored in `taus`.
    fn compute_panel(
        &mut self,
        graph: &mut TaskGraph,
        mat_a: &mut Matrix<T>,
        view: &SubPanelView,
        taus: WriteTile<T>,
        ctx: &PanelContext,
    );

    /// Whether the panel data goes through a staging copy. The trigger of the next panel
    /// then waits on the update of X on the pivot rank row.
    fn is_staged(&self) -> bool;
}

pub(crate) fn panel_strategy<T: Scalar>(
    kind: PanelStrategy,
    dist: &Distribution,
) -> Box<dyn PanelComputeStrategy<T>> {
    match kind {
        PanelStrategy::InPlace => Box::new(InPlace),
        PanelStrategy::Staged => Box::new(Staged::<T>::new(dist)),
    }
}

fn schedule_panel_workers<T: Scalar>(
    graph: &mut TaskGraph,
    tiles: Vec<WriteTile<T>>,
    taus: WriteTile<T>,
    cols: usize,
    ctx: &PanelContext,
) {
    let mut task = Task::new("compute_panel")
        .priority(Priority::High)
        .writes_all(&tiles)
        .writes(&taus);
    let collective = ctx.collective.clone();
    if let Some(collective) = &collective {
        graph.on_abort(Arc::clone(collective.chain.communicator().abort_flag()));
        task = task
            .exclusive(collective.chain.resource_id())
            .after_opt(collective.trigger);
    }
    let max_workers = ctx.max_workers;
    let busy_wait = ctx.busy_wait;

    graph.spawn(task, move || {
        let mut guards: Vec<_> = tiles.iter().map(|tile| tile.lock()).collect();
        let views: Vec<_> = guards.iter_mut().map(|guard| guard.view_mut()).collect();
        let mut taus = taus.lock();
        let (has_head, comm) = match &collective {
            Some(c) => (c.rank_has_head, Some(c.chain.communicator())),
            None => (true, None),
        };
        let workers = PanelWorkers {
            nworkers: red2band_panel_num_workers(views.len(), max_workers),
            busy_wait,
            comm,
        };
        workers.compute_panel(views, taus.view_mut(), cols, has_head)
    });
}

/// Computes directly on the sub-tiles of the matrix.
pub(crate) struct InPlace;

impl<T: Scalar> PanelComputeStrategy<T> for InPlace {
    fn compute_panel(
        &mut self,
        graph: &mut TaskGraph,
        mat_a: &mut Matrix<T>,
        view: &SubPanelView,
        taus: WriteTile<T>,
        ctx: &PanelContext,
    ) {
        let tiles = view
            .iter_local()
            .map(|index| mat_a.readwrite(index).split(view.spec(index)))
            .collect();
        schedule_panel_workers(graph, tiles, taus, view.cols(), ctx);
    }

    fn is_staged(&self) -> bool {
        false
    }
}

/// Copies the panel to a workspace, computes there and copies the result back.
pub(crate) struct Staged<T> {
    workspace: RoundRobin<Panel<T>>,
}

impl<T: Scalar> Staged<T> {
    pub(crate) fn new(dist: &Distribution) -> Self {
        let dist = *dist;
        Self {
            workspace: RoundRobin::new(2, || Panel::new(Coord::Col, dist)),
        }
    }
}

impl<T: Scalar> PanelComputeStrategy<T> for Staged<T> {
    fn compute_panel(
        &mut self,
        graph: &mut TaskGraph,
        mat_a: &mut Matrix<T>,
        view: &SubPanelView,
        taus: WriteTile<T>,
        ctx: &PanelContext,
    ) {
        let ws = self.workspace.next_resource();
        for index in view.iter_local() {
            let spec = view.spec(index);
            let src = mat_a.read(index).split(spec);
            let dst = ws.readwrite(index).split(spec);
            graph.spawn(
                Task::new("stage_panel")
                    .priority(Priority::High)
                    .reads(&src)
                    .writes(&dst),
                move || {
                    blas::copy(src.lock().view(), dst.lock().view_mut());
                    Ok(())
                },
            );
        }

        let tiles = view
            .iter_local()
            .map(|index| ws.readwrite(index).split(view.spec(index)))
            .collect();
        schedule_panel_workers(graph, tiles, taus, view.cols(), ctx);

        for index in view.iter_local() {
            let spec = view.spec(index);
            let src = ws.read(index).split(spec);
            let dst = mat_a.readwrite(index).split(spec);
            graph.spawn(
                Task::new("unstage_panel")
                    .priority(Priority::High)
                    .reads(&src)
                    .writes(&dst),
                move || {
                    blas::copy(src.lock().view(), dst.lock().view_mut());
                    Ok(())
                },
            );
        }
    }

    fn is_staged(&self) -> bool {
        true
    }
}
