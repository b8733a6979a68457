pub mod selectivedeployment;
