/*
    Integration tests for the sync subsystem

    Multi-peer topologies wired in process: the test network shuttles
    (conn_id, message) pairs between protocol instances exactly as the
    mesh node does over TCP.
*/
