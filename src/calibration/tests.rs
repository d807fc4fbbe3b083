// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use marlu::c64;

use super::*;
use crate::store::PolProduct;

fn table_at(times: &[f64]) -> CalTable {
    let table = CalTable::new();
    for &time in times {
        table.append_row(time);
    }
    table
}

fn ant(antenna: usize) -> JonesIndex {
    JonesIndex { antenna, beam: 0 }
}

#[test]
fn solution_lookup_prefers_the_latest_earlier_row() {
    let solutions = CalSolutions::open(table_at(&[0.0, 3.0, 7.0])).unwrap();
    assert_eq!(solutions.most_recent_solution(), 2);
    assert_eq!(solutions.solution_id(5.0).unwrap(), 1);
    assert_eq!(solutions.solution_id(2.0).unwrap(), 0);
    assert_eq!(solutions.solution_id_before(7.0).unwrap(), (2, 7.0));
    assert_eq!(solutions.solution_id_before(100.0).unwrap(), (2, 7.0));
    assert!(matches!(
        solutions.solution_id_before(-1.0),
        Err(CalError::SolutionNotFound { .. })
    ));
}

#[test]
fn solution_lookup_after_falls_back_when_the_table_ends() {
    let solutions = CalSolutions::open(table_at(&[0.0, 3.0, 7.0])).unwrap();
    assert_eq!(solutions.solution_id_after(5.0).unwrap(), (2, 7.0));
    assert_eq!(solutions.solution_id_after(0.0).unwrap(), (0, 0.0));
    // Past the end of the table the latest earlier solution has to do.
    assert_eq!(solutions.solution_id_after(8.0).unwrap(), (2, 7.0));
}

#[test]
fn empty_table_cannot_be_opened() {
    assert!(matches!(
        CalSolutions::open(CalTable::new()),
        Err(CalError::EmptyTable)
    ));
}

#[test]
fn out_of_range_solution_ids_are_rejected() {
    let table = table_at(&[0.0]);
    let solutions = CalSolutions::open(table.clone()).unwrap();
    assert!(matches!(
        solutions.ro_solution(1),
        Err(CalError::BadSolutionId { id: 1, nrow: 1 })
    ));
    let writer = CalSolutionsWriter::new(table, 2, 1, 4).unwrap();
    assert!(matches!(
        writer.rw_solution(5),
        Err(CalError::BadSolutionId { id: 5, nrow: 1 })
    ));
}

#[test]
fn writer_rejects_zero_dimensions() {
    assert!(matches!(
        CalSolutionsWriter::new(CalTable::new(), 0, 1, 4),
        Err(CalError::BadDimensions { .. })
    ));
}

#[test]
fn gain_round_trip_through_a_reopened_store() {
    let table = CalTable::new();
    let writer = CalSolutionsWriter::new(table.clone(), 2, 1, 4).unwrap();
    let id = writer.new_solution_id(100.0);
    {
        let accessor = writer.rw_solution(id).unwrap();
        accessor
            .set_gain(
                ant(0),
                JonesJTerm {
                    g1: c64::new(2.0, 1.0),
                    g1_valid: true,
                    g2: c64::new(3.0, 1.0),
                    g2_valid: true,
                },
            )
            .unwrap();
        // Dropping the accessor flushes the dirty gain cube.
    }

    let solutions = CalSolutions::open(table).unwrap();
    let accessor = solutions.ro_solution(id).unwrap();
    let written = accessor.gain(ant(0)).unwrap();
    assert_eq!(written.g1, c64::new(2.0, 1.0));
    assert!(written.g1_valid);
    assert_eq!(written.g2, c64::new(3.0, 1.0));
    assert!(written.g2_valid);

    // The rest of the cube was identity-filled and left invalid.
    let untouched = accessor.gain(ant(1)).unwrap();
    assert_eq!(untouched.g1, c64::new(1.0, 0.0));
    assert!(!untouched.g1_valid);
    assert!(!untouched.g2_valid);
}

#[test]
fn reads_fall_back_to_the_nearest_earlier_solution() {
    let table = table_at(&[0.0, 3.0, 7.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 1, 1, 4).unwrap();
    let accessor = writer.rw_solution(0).unwrap();
    accessor
        .set_gain(
            ant(0),
            JonesJTerm {
                g1: c64::new(4.0, 0.0),
                g1_valid: true,
                g2: c64::new(5.0, 0.0),
                g2_valid: true,
            },
        )
        .unwrap();
    accessor.flush().unwrap();

    let solutions = CalSolutions::open(table).unwrap();
    for id in [1, 2] {
        let later = solutions.ro_solution(id).unwrap();
        let term = later.gain(ant(0)).unwrap();
        assert_eq!(term.g1, c64::new(4.0, 0.0));
        assert!(term.g1_valid);
    }
}

#[test]
fn exhausted_backward_search_is_fatal() {
    let table = table_at(&[0.0, 3.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 1, 1, 4).unwrap();
    writer
        .rw_solution(1)
        .unwrap()
        .set_gain(ant(0), JonesJTerm::default())
        .unwrap();

    // The gain column now exists, but row 0 has nothing at or before it.
    let solutions = CalSolutions::open(table).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    assert!(matches!(
        accessor.gain(ant(0)),
        Err(CalError::NoValidElement {
            column: "GAIN",
            row: 0
        })
    ));
}

#[test]
fn never_written_tracks_serve_defaults() {
    let solutions = CalSolutions::open(table_at(&[0.0])).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    assert_eq!(accessor.gain(ant(0)).unwrap(), JonesJTerm::default());
    assert_eq!(accessor.leakage(ant(0)).unwrap(), JonesDTerm::default());
    assert_eq!(accessor.bandpass(ant(0), 3).unwrap(), JonesJTerm::default());
    assert_eq!(accessor.ionosphere(ant(0)).unwrap(), IonoTerm::default());
}

#[test]
fn repeated_reads_search_backward_once() {
    let table = table_at(&[0.0, 3.0, 7.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 2, 1, 4).unwrap();
    writer
        .rw_solution(0)
        .unwrap()
        .set_gain(
            ant(0),
            JonesJTerm {
                g1_valid: true,
                ..JonesJTerm::default()
            },
        )
        .unwrap();

    let solutions = CalSolutions::open(table).unwrap();
    let accessor = solutions.ro_solution(2).unwrap();
    accessor.gain(ant(0)).unwrap();
    accessor.gain(ant(1)).unwrap();
    accessor.gain(ant(0)).unwrap();
    assert_eq!(accessor.backward_searches(), 1);
}

#[test]
fn read_only_setters_are_rejected_before_mutation() {
    let solutions = CalSolutions::open(table_at(&[0.0])).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    assert!(matches!(
        accessor.set_gain(ant(0), JonesJTerm::default()),
        Err(CalError::ReadOnly)
    ));
    // The rejection happened before any cache was touched, so reads still
    // see an untouched track.
    assert_eq!(accessor.gain(ant(0)).unwrap(), JonesJTerm::default());
}

#[test]
fn composite_validity_is_or_based() {
    let table = table_at(&[0.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 1, 1, 4).unwrap();
    writer
        .rw_solution(0)
        .unwrap()
        .set_leakage(
            ant(0),
            JonesDTerm {
                d12: c64::new(0.1, 0.0),
                d12_valid: true,
                d21: c64::new(0.2, 0.0),
                d21_valid: true,
            },
        )
        .unwrap();

    let solutions = CalSolutions::open(table).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    // A valid leakage pair alone satisfies the any-constituent rule, but
    // not the all-constituents one.
    assert!(accessor.jones_valid(ant(0), 0).unwrap());
    assert!(!accessor.jones_all_valid(ant(0), 0).unwrap());

    let jones = accessor.jones(ant(0), 0).unwrap();
    assert_eq!(jones[0], c64::new(1.0, 0.0));
    assert_eq!(jones[3], c64::new(1.0, 0.0));
    assert_eq!(jones[1], c64::new(0.1, 0.0));
    assert_eq!(jones[2], c64::new(-0.2, 0.0));
}

#[test]
fn composite_matrix_combines_gain_and_bandpass() {
    let table = table_at(&[0.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 1, 1, 4).unwrap();
    {
        let accessor = writer.rw_solution(0).unwrap();
        accessor
            .set_gain(
                ant(0),
                JonesJTerm {
                    g1: c64::new(2.0, 0.0),
                    g1_valid: true,
                    g2: c64::new(3.0, 0.0),
                    g2_valid: true,
                },
            )
            .unwrap();
        accessor
            .set_bandpass(
                ant(0),
                JonesJTerm {
                    g1: c64::new(0.5, 0.0),
                    g1_valid: true,
                    g2: c64::new(0.25, 0.0),
                    g2_valid: true,
                },
                1,
            )
            .unwrap();
    }

    let solutions = CalSolutions::open(table).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    let jones = accessor.jones(ant(0), 1).unwrap();
    assert_abs_diff_eq!(jones[0].re, 1.0);
    assert_abs_diff_eq!(jones[3].re, 0.75);
    assert_eq!(jones[1], c64::new(0.0, 0.0));
    assert_eq!(jones[2], c64::new(0.0, 0.0));
    assert!(accessor.jones_valid(ant(0), 1).unwrap());
    assert!(!accessor.jones_all_valid(ant(0), 1).unwrap());

    // At a channel whose bandpass was never set, only the gains apply.
    let plain = accessor.jones(ant(0), 0).unwrap();
    assert_abs_diff_eq!(plain[0].re, 2.0);
    assert_abs_diff_eq!(plain[3].re, 3.0);
}

#[test]
fn no_valid_constituents_yield_an_invalid_empty_matrix() {
    let solutions = CalSolutions::open(table_at(&[0.0])).unwrap();
    let accessor = solutions.ro_solution(0).unwrap();
    let (jones, valid) = accessor.jones_and_validity(ant(0), 0).unwrap();
    assert!(!valid);
    assert_eq!(jones, marlu::Jones::default());
}

#[test]
fn set_jones_element_is_read_modify_write() {
    let table = table_at(&[0.0]);
    let writer = CalSolutionsWriter::new(table, 1, 1, 4).unwrap();
    let accessor = writer.rw_solution(0).unwrap();

    accessor
        .set_jones_element(ant(0), PolProduct::XX, c64::new(5.0, 0.0))
        .unwrap();
    accessor
        .set_jones_element(ant(0), PolProduct::YY, c64::new(6.0, 0.0))
        .unwrap();
    let gains = accessor.gain(ant(0)).unwrap();
    assert_eq!(gains.g1, c64::new(5.0, 0.0));
    assert!(gains.g1_valid);
    assert_eq!(gains.g2, c64::new(6.0, 0.0));
    assert!(gains.g2_valid);

    accessor
        .set_jones_element(ant(0), PolProduct::XY, c64::new(0.3, 0.0))
        .unwrap();
    let leakages = accessor.leakage(ant(0)).unwrap();
    assert_eq!(leakages.d12, c64::new(0.3, 0.0));
    assert!(leakages.d12_valid);
    // The other element of the term was carried over untouched.
    assert_eq!(leakages.d21, c64::new(0.0, 0.0));
    assert!(!leakages.d21_valid);
}

#[test]
fn bandpass_elements_interleave_polarizations_per_channel() {
    let table = table_at(&[0.0]);
    let writer = CalSolutionsWriter::new(table, 1, 1, 4).unwrap();
    let accessor = writer.rw_solution(0).unwrap();
    accessor
        .set_bandpass_element(ant(0), PolProduct::XX, 2, c64::new(0.9, 0.0))
        .unwrap();

    let set = accessor.bandpass(ant(0), 2).unwrap();
    assert_eq!(set.g1, c64::new(0.9, 0.0));
    assert!(set.g1_valid);
    assert!(!set.g2_valid);

    // Neighboring channels are untouched identity elements.
    let neighbor = accessor.bandpass(ant(0), 1).unwrap();
    assert_eq!(neighbor.g1, c64::new(1.0, 0.0));
    assert!(!neighbor.g1_valid);
}

#[test]
fn writes_target_the_requested_solution_only() {
    let table = table_at(&[0.0, 10.0]);
    let writer = CalSolutionsWriter::new(table.clone(), 1, 1, 4).unwrap();
    writer
        .rw_solution(0)
        .unwrap()
        .set_gain(
            ant(0),
            JonesJTerm {
                g1: c64::new(1.5, 0.0),
                g1_valid: true,
                ..JonesJTerm::default()
            },
        )
        .unwrap();
    writer
        .rw_solution(1)
        .unwrap()
        .set_gain(
            ant(0),
            JonesJTerm {
                g1: c64::new(2.5, 0.0),
                g1_valid: true,
                ..JonesJTerm::default()
            },
        )
        .unwrap();

    let solutions = CalSolutions::open(table).unwrap();
    let first = solutions.ro_solution(0).unwrap().gain(ant(0)).unwrap();
    let second = solutions.ro_solution(1).unwrap().gain(ant(0)).unwrap();
    assert_eq!(first.g1, c64::new(1.5, 0.0));
    assert_eq!(second.g1, c64::new(2.5, 0.0));
}
