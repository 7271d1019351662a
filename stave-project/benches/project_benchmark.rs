use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use stave_project::{default_registry, Event, Project, Track};
use stave_vcs::{MemoryPack, VcsConfig, VersionControl};
use std::hint::black_box;
use std::sync::Arc;

fn project_with_notes(notes: usize) -> (Project, uuid::Uuid) {
    let project = Project::new("Bench", "bench");
    let mut track = Track::piano("/Piano", "grand");
    for i in 0..notes {
        track.add_event(Event::note(i as f64 * 0.25, 48 + (i % 24) as i32, 0.25, 0.8));
    }
    let id = project.add_track(track).unwrap();
    (project, id)
}

fn bench_single_note_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_note_edit");

    for notes in [100usize, 1000, 5000] {
        group.bench_with_input(BenchmarkId::from_parameter(notes), &notes, |b, &notes| {
            let (project, track) = project_with_notes(notes);
            let vcs = VersionControl::new(
                VcsConfig::default(),
                Arc::new(default_registry()),
                MemoryPack::shared(),
            );
            vcs.commit(&project, "initial").unwrap();

            let mut velocity = 0.0;
            b.iter(|| {
                velocity += 0.001;
                project
                    .update_track(track, |t| {
                        let id = t.events[notes / 2].id;
                        t.update_event(id, |e| {
                            e.kind = stave_project::EventKind::Note {
                                key: 60,
                                length: 0.25,
                                velocity,
                            }
                        })
                    })
                    .unwrap()
                    .unwrap();
                black_box(vcs.commit(&project, "edit").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_note_edit);
criterion_main!(benches);
