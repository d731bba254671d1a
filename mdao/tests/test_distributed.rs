#![cfg(feature = "threads")]

use mdao::{
    assembler::IndexSpan, comm::ThreadGroup, Component, Error, Group, Problem, ProcRange,
    ProcessGroup as _, Role, SegmentedBackend, SystemTree,
};
use rstest::rstest;

/// A parallel root running `a` (output `x`) and `b` (input `y`) on separate ranks.
fn split_pair() -> Result<SystemTree, Error> {
    let mut tree = SystemTree::new(Group::parallel().connect("a.x", "b.y"));
    tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
    tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 3))?;
    Ok(tree)
}

#[test_log::test]
fn test_two_process_split() {
    let results = ThreadGroup::run(2, |comm| {
        let mut problem = Problem::new(split_pair()?, comm);
        problem.setup()?;

        let assembler = problem.assembler()?;
        let vectors = problem.vectors(None)?;
        Ok::<_, Error>((
            vectors.output.len(),
            vectors.input.len(),
            assembler.connections().len(),
            assembler.input_global_index_map().to_vec(),
        ))
    });
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(results[0], (3, 0, 1, vec![]));
    assert_eq!(
        results[1],
        (0, 3, 1, vec![Some(IndexSpan { offset: 0, len: 3 })])
    );
}

#[test_log::test]
fn test_transfer_across_ranks() {
    let inputs = ThreadGroup::run(2, |comm| {
        let mut problem = Problem::new(split_pair()?, comm);
        problem.setup()?;

        if let Some(x) = problem.vectors_mut(None)?.output.get_mut("a.x") {
            x.copy_from_slice(&[1.0, 2.0, 3.0]);
        }
        problem.transfer(None)?;
        Ok::<_, Error>(problem.vectors(None)?.input.as_slice().to_vec())
    });
    let inputs: Vec<_> = inputs.into_iter().map(Result::unwrap).collect();

    assert_eq!(inputs, vec![vec![], vec![1.0, 2.0, 3.0]]);
}

#[test_log::test]
fn test_unknown_variable_fails_on_every_rank() {
    let results = ThreadGroup::run(2, |comm| {
        let mut tree = SystemTree::new(Group::parallel().connect("a.x", "b.z"));
        tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
        tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 3))?;

        let mut problem = Problem::new(tree, comm);
        let err = problem.setup().map(|_| ());
        assert!(!problem.is_setup());
        err
    });

    for result in results {
        assert!(matches!(result, Err(Error::UnknownVariable { .. })));
    }
}

#[test_log::test]
fn test_error_seen_by_one_rank_reaches_all() {
    let results = ThreadGroup::run(2, |comm| {
        // `b` only runs on rank 1, so only rank 1 resolves its connect request
        let mut tree = SystemTree::new(Group::parallel());
        tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 3))?;
        let b = tree.add_subsystem(
            tree.root(),
            "b",
            Group::serial().connect("c.z", "c.missing"),
        )?;
        tree.add_subsystem(
            b,
            "c",
            Component::new().add_input("y", 3).add_output("z", 3),
        )?;

        let mut problem = Problem::new(tree, comm);
        let result = problem.setup().map(|_| ());
        assert!(!problem.is_setup());
        result
    });

    for result in results {
        assert!(
            matches!(
                &result,
                Err(Error::UnknownVariable { name, system }) if name == "b.c.missing" && system == "b"
            ),
            "{result:?}"
        );
    }
}

/// A serial root holding a parallel pair of sources and a sink fed by both.
fn mixed_tree() -> Result<SystemTree, Error> {
    let mut tree = SystemTree::new(
        Group::serial()
            .connect("par.left.u", "sink.u")
            .connect("par.right.v", "sink.v"),
    );
    let root = tree.root();
    let par = tree.add_subsystem(root, "par", Group::parallel())?;
    tree.add_subsystem(par, "left", Component::new().add_output("u", 2))?;
    tree.add_subsystem(
        par,
        "right",
        Component::new().add_input("bias", 1).add_output("v", 4),
    )?;
    tree.add_subsystem(
        root,
        "sink",
        Component::new().add_input("u", 2).add_input("v", 4),
    )?;
    Ok(tree)
}

type Schema = Vec<(Role, String, usize, usize)>;

fn schema_on(procs: usize) -> Vec<(Schema, Vec<(String, String)>)> {
    ThreadGroup::run(procs, |comm| {
        let mut problem = Problem::new(mixed_tree()?, comm);
        let summary = problem.setup()?.summary()?;
        let variables = summary
            .variables
            .into_iter()
            .map(|var| (var.role, var.name, var.size, var.global_offset))
            .collect();
        let connections = summary
            .connections
            .into_iter()
            .map(|conn| (conn.source, conn.target))
            .collect();
        Ok::<_, Error>((variables, connections))
    })
    .into_iter()
    .map(Result::unwrap)
    .collect()
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(5)]
#[test_log::test]
fn test_schema_is_independent_of_process_count(#[case] procs: usize) {
    let reference = schema_on(2).remove(0);
    let schemas = schema_on(procs);

    assert_eq!(schemas.len(), procs);
    for schema in schemas {
        assert_eq!(schema, reference);
    }

    let (variables, connections) = reference;
    let names: Vec<_> = variables.iter().map(|var| var.1.as_str()).collect();
    assert_eq!(
        names,
        vec!["par.right.bias", "sink.u", "sink.v", "par.left.u", "par.right.v"]
    );
    assert_eq!(
        connections,
        vec![
            ("par.left.u".to_owned(), "sink.u".to_owned()),
            ("par.right.v".to_owned(), "sink.v".to_owned()),
        ]
    );
}

#[test_log::test]
fn test_process_ranges_follow_partition() {
    let ranges = ThreadGroup::run(3, |comm| {
        let mut problem = Problem::new(mixed_tree()?, comm);
        let summary = problem.setup()?.summary()?;
        Ok::<_, Error>(
            summary
                .variables
                .into_iter()
                .map(|var| (var.name, var.proc_range))
                .collect::<Vec<_>>(),
        )
    });

    for ranges in ranges {
        let ranges = ranges.unwrap();
        let range_of = |name: &str| {
            ranges
                .iter()
                .find(|(var, _)| var == name)
                .map(|(_, range)| *range)
        };
        assert_eq!(range_of("par.left.u"), Some(ProcRange::new(0, 2)));
        assert_eq!(range_of("par.right.v"), Some(ProcRange::new(2, 3)));
        assert_eq!(range_of("sink.u"), Some(ProcRange::new(0, 3)));
    }
}

#[test_log::test]
fn test_segmented_vectors_publish_once() {
    let results = ThreadGroup::run(3, |comm| {
        let rank = comm.rank();
        let mut tree = SystemTree::new(Group::serial().connect("a.x", "b.y"));
        tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", 2))?;
        tree.add_subsystem(tree.root(), "b", Component::new().add_input("y", 2))?;

        let mut problem = Problem::new(tree, comm).with_backend(SegmentedBackend);
        problem.setup()?;

        // Every replica writes its own rank; only the owner's values travel.
        problem.vectors_mut(None)?.output.fill(rank as f64 + 1.0);
        problem.transfer(None)?;

        let vectors = problem.vectors(None)?;
        Ok::<_, Error>((
            vectors.output.owned_segments().count(),
            vectors.input.as_slice().to_vec(),
        ))
    });

    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        results,
        vec![
            (1, vec![1.0, 1.0]),
            (0, vec![1.0, 1.0]),
            (0, vec![1.0, 1.0]),
        ]
    );
}

#[test_log::test]
fn test_inconsistent_replica_sizes() {
    let results = ThreadGroup::run(2, |comm| {
        let size = comm.rank() + 1;
        let mut tree = SystemTree::new(Group::serial());
        tree.add_subsystem(tree.root(), "a", Component::new().add_output("x", size))?;
        Problem::new(tree, comm).setup().map(|_| ())
    });

    for result in results {
        assert!(matches!(
            result,
            Err(Error::InconsistentSize {
                first: 1,
                second: 2,
                ..
            })
        ));
    }
}
