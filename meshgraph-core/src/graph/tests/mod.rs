/*
    Integration tests for the graph subsystem

    Covers replica convergence under reordering and duplication, tie-break
    determinism, and tombstone behavior across replicas.
*/

pub mod tombstone_tests;
