mod helpers;

mod executor_tests;
